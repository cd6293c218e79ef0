//! Connection Manager and the task that owns every other per-client
//! component. Ownership is one-way: `ConnectionTask` owns everything,
//! `PubSubClient` only holds a command sender and a snapshot receiver
//! created at construction.
//!
//! A single `tokio::select!` loop multiplexes commands from the public
//! facade, inbound frames from the transport, heartbeat ticks, and
//! ack-deadline sweeps, with the reconnect loop wrapped around it.

use crate::{
	ack::{AckKind, AckManager},
	backoff::Backoff,
	channel::Channel,
	codec::{self, AckPath, AckResult, PacketEnvelope, PresenceStatusWire},
	command::{Command, CommandRx},
	error::Error,
	grant,
	handler::{PresenceEvent, PresenceStatus},
	heartbeat::Heartbeat,
	ids,
	options::ClientOptions,
	state::{ConnectionState, StateManager},
	subscription,
};
use futures_util::{SinkExt, StreamExt};
use std::{
	collections::VecDeque,
	time::{Duration, Instant},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

/// Maximum number of frames buffered while the transport is not `Open`.
pub const OUTBOUND_QUEUE_CAP: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The sole owner of every stateful component behind the public facade.
pub struct ConnectionTask {
	options: ClientOptions,
	http: reqwest::Client,
	state: StateManager,
	ack: AckManager,
	outbound: VecDeque<PacketEnvelope>,
	backoff: Backoff,
	heartbeat: Heartbeat,
	ws: Option<WsStream>,
	attempt: u32,
	/// `Some` once a `connect()` call is waiting on the next open/error
	/// transition. An in-flight handshake races to completion rather than
	/// being torn down when a waiter's own timeout expires.
	connect_waiters: Vec<tokio::sync::oneshot::Sender<Result<(), Error>>>,
	shutting_down: bool,
	/// When set, the run loop sleeps until this instant and then retries
	/// `attempt_open`. Computed once per failed
	/// attempt so the backoff counter only advances once per attempt,
	/// regardless of which `select!` branch happens to fire meanwhile.
	reconnect_at: Option<Instant>,
}

impl ConnectionTask {
	pub fn new(options: ClientOptions) -> Self {
		let heartbeat = Heartbeat::new(options.heartbeat);
		Self {
			http: reqwest::Client::new(),
			heartbeat,
			options,
			state: StateManager::new(),
			ack: AckManager::new(),
			outbound: VecDeque::with_capacity(64),
			backoff: Backoff::default(),
			ws: None,
			attempt: 0,
			connect_waiters: Vec::new(),
			shutting_down: false,
			reconnect_at: None,
		}
	}

	pub fn state(&self) -> &StateManager {
		&self.state
	}

	/// Runs the task to completion. Returns once a `Close` command has been
	/// processed or every command sender has been dropped.
	pub async fn run(mut self, mut commands: CommandRx) {
		loop {
			if self.shutting_down {
				break;
			}

			tokio::select! {
				biased;

				maybe_command = commands.recv() => {
					match maybe_command {
						Some(command) => self.handle_command(command).await,
						None => break,
					}
				}

				Some(message) = recv_ws(&mut self.ws), if self.ws.is_some() => {
					self.handle_inbound(message).await;
				}

				_ = self.heartbeat.tick(), if self.state.connection_state() == ConnectionState::Open => {
					self.send_heartbeat().await;
				}

				_ = wait_until(self.reconnect_at), if self.reconnect_at.is_some() => {
					self.reconnect_at = None;
					self.attempt_open().await;
				}

				_ = tokio::time::sleep(Duration::from_millis(250)) => {
					self.ack.evict_expired(Instant::now());
				}
			}

			if self.state.connection_state() == ConnectionState::Open && self.heartbeat.is_silent() {
				tracing::warn!("no inbound traffic within 2x heartbeat interval; treating connection as dead");
				self.transition_to_error("heartbeat silence".into()).await;
			}
		}

		self.ack.cancel_all();
		self.state.cancel_ready_waiters();
		for waiter in self.connect_waiters.drain(..) {
			let _ = waiter.send(Err(Error::Cancelled));
		}
	}

	async fn handle_command(&mut self, command: Command) {
		match command {
			Command::SetChannel { channel } => self.state.set_channel(channel),
			Command::Connect { reply } => self.handle_connect(reply).await,
			Command::Subscribe(cmd) => self.handle_subscribe(cmd).await,
			Command::Unsubscribe(cmd) => self.handle_unsubscribe(cmd).await,
			Command::Publish(cmd) => self.handle_publish(cmd).await,
			Command::OnPresence { topic, handler } => {
				self.state.on_presence(topic, handler);
			}
			Command::OffPresence { topic, handler } => self.state.off_presence(&topic, &handler),
			Command::ClearPresenceHandlers { topic } => self.state.clear_presence_handlers(&topic),
			Command::WaitForSubscriptionReady { topic, reply } => {
				self.state.wait_for_subscription_ready(topic, reply);
			}
			Command::Close { reply } => {
				self.handle_close().await;
				let _ = reply.send(());
			}
		}
	}

	async fn handle_connect(&mut self, reply: tokio::sync::oneshot::Sender<Result<(), Error>>) {
		if self.state.channel().is_none() {
			let _ = reply.send(Err(Error::NotJoined));
			return;
		}
		match self.state.connection_state() {
			ConnectionState::Open => {
				let _ = reply.send(Ok(()));
			}
			ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Error => {
				self.connect_waiters.push(reply);
				self.attempt_open().await;
			}
			ConnectionState::Connecting | ConnectionState::Closing => {
				self.connect_waiters.push(reply);
			}
		}
	}

	/// Dials the gateway. Only called from `Idle`, `Closed`, or `Error`.
	async fn attempt_open(&mut self) {
		let Some(channel) = self.state.channel().cloned() else {
			return;
		};
		self.state.set_connection_state(ConnectionState::Connecting);

		match self.dial(&channel).await {
			Ok(stream) => {
				self.ws = Some(stream);
				self.attempt = 0;
				self.backoff.reset();
				self.heartbeat.note_inbound_traffic();
				self.state.set_error(None);
				self.state.set_connection_state(ConnectionState::Open);

				self.flush_outbound().await;
				self.resubscribe_after_reconnect().await;

				for waiter in self.connect_waiters.drain(..) {
					let _ = waiter.send(Ok(()));
				}
			}
			Err(error) => {
				tracing::error!(%error, attempt = self.attempt, "failed to open connection");
				let is_auth_failure = matches!(error, Error::Auth { .. });
				self.attempt += 1;
				self.state.set_error(Some(error.to_string()));
				self.state.set_connection_state(ConnectionState::Error);

				if is_auth_failure {
					// Auth failures are not retried automatically; surface
					// to the caller and wait for an explicit `connect()`
					// re-invocation instead of scheduling a reconnect.
					for waiter in self.connect_waiters.drain(..) {
						let _ = waiter.send(Err(error.clone()));
					}
				} else {
					self.reconnect_at = Some(Instant::now() + self.backoff.next_delay());
				}
			}
		}
	}

	async fn dial(&self, channel: &Channel) -> Result<WsStream, Error> {
		let grant = grant::obtain_grant(
			&self.http,
			&self.options.auth_base_url,
			channel,
			self.options.token_provider.as_ref(),
			self.options.grant_cache.as_deref(),
			self.options.enable_caching,
		)
		.await?;

		let url = format!(
			"{}{}grant={}",
			self.options.ws_url,
			if self.options.ws_url.contains('?') { '&' } else { '?' },
			grant
		);

		let connect = tokio_tungstenite::connect_async(url.as_str());
		let result = match self.options.connection_timeout {
			Some(timeout) => tokio::time::timeout(timeout, connect)
				.await
				.map_err(|_| Error::Timeout)?,
			None => connect.await,
		};

		let (stream, _response) = result.map_err(|error| Error::Transport(error.to_string()))?;
		Ok(stream)
	}

	async fn transition_to_error(&mut self, reason: String) {
		self.ws = None;
		self.state.set_error(Some(reason));
		self.state.set_connection_state(ConnectionState::Error);
		self.ack.cancel_all();
	}

	async fn handle_close(&mut self) {
		self.state.set_connection_state(ConnectionState::Closing);
		if let Some(mut ws) = self.ws.take() {
			let _ = ws.close(None).await;
		}
		self.outbound.clear();
		self.sync_queue_len();
		self.ack.cancel_all();
		self.state.cancel_ready_waiters();
		for waiter in self.connect_waiters.drain(..) {
			let _ = waiter.send(Err(Error::Cancelled));
		}
		self.state.set_connection_state(ConnectionState::Closed);
		self.shutting_down = true;
	}

	fn has_queue_room(&self) -> bool {
		self.outbound.len() < OUTBOUND_QUEUE_CAP
	}

	async fn handle_subscribe(&mut self, cmd: crate::command::SubscribeCommand) {
		if self.state.channel().is_none() {
			let _ = cmd.reply.send(crate::ack::AckOutcome::Err {
				code: "NOT_JOINED".into(),
				message: "joinChannel must be called before subscribe".into(),
			});
			return;
		}
		if !self.has_queue_room() {
			tracing::error!("outbound queue is full; rejecting subscribe with Backpressure");
			let _ = cmd.reply.send(crate::ack::AckOutcome::Err {
				code: "BACKPRESSURE".into(),
				message: "outbound send queue is full".into(),
			});
			return;
		}
		let client_msg_id = ids::client_msg_id();
		if let Ok(frame) = subscription::begin_subscribe(
			&mut self.state,
			&mut self.ack,
			cmd.topic,
			cmd.handler,
			cmd.options,
			self.options.subscription_timeout,
			client_msg_id,
			cmd.reply,
		) {
			self.enqueue(frame).await;
		}
	}

	async fn handle_unsubscribe(&mut self, cmd: crate::command::UnsubscribeCommand) {
		if !self.has_queue_room() {
			tracing::error!("outbound queue is full; rejecting unsubscribe with Backpressure");
			let _ = cmd.reply.send(crate::ack::AckOutcome::Err {
				code: "BACKPRESSURE".into(),
				message: "outbound send queue is full".into(),
			});
			return;
		}
		let client_msg_id = ids::client_msg_id();
		let frame = subscription::begin_unsubscribe(
			&mut self.state,
			&mut self.ack,
			cmd.topic,
			self.options.subscription_timeout,
			client_msg_id,
			cmd.reply,
		);
		self.enqueue(frame).await;
	}

	async fn handle_publish(&mut self, cmd: crate::command::PublishCommand) {
		if self.state.channel().is_none() {
			if let Some(reply) = cmd.reply {
				let _ = reply.send(crate::ack::AckOutcome::Err {
					code: "NOT_JOINED".into(),
					message: "joinChannel must be called before publish".into(),
				});
			}
			return;
		}
		if !self.has_queue_room() {
			tracing::error!("outbound queue is full; rejecting publish with Backpressure");
			if let Some(reply) = cmd.reply {
				let _ = reply.send(crate::ack::AckOutcome::Err {
					code: "BACKPRESSURE".into(),
					message: "outbound send queue is full".into(),
				});
			}
			return;
		}

		let body = crate::command::pending_message_body(&cmd.topic, cmd.payload, &cmd.client_msg_id, epoch_millis());
		let frame = PacketEnvelope::Publish {
			topic: cmd.topic.clone(),
			payload: body,
		};

		if let Some(reply) = cmd.reply {
			self.ack.register_publish(
				cmd.client_msg_id,
				cmd.topic,
				Instant::now() + self.options.publish_ack_timeout,
				reply,
			);
		}

		self.enqueue(frame).await;
	}

	/// Enqueues a frame. Callers must check [`Self::has_queue_room`] first;
	/// by the time a frame reaches here it is always accepted.
	async fn enqueue(&mut self, frame: PacketEnvelope) {
		self.outbound.push_back(frame);
		self.sync_queue_len();
		if self.state.connection_state() == ConnectionState::Open {
			self.flush_outbound().await;
		}
	}

	/// Flushes the outbound queue in FIFO order, ahead of any newly
	/// enqueued frames.
	async fn flush_outbound(&mut self) {
		let Some(ws) = self.ws.as_mut() else { return };
		while let Some(frame) = self.outbound.pop_front() {
			match codec::encode(&frame) {
				Ok(text) => {
					tracing::trace!(frame = %text, "writing frame");
					if let Err(error) = ws.send(WsMessage::Text(text)).await {
						tracing::error!(%error, "failed to write frame; dropping connection");
						self.outbound.push_front(frame);
						self.ws = None;
						self.sync_queue_len();
						self.transition_to_error(error.to_string()).await;
						return;
					}
				}
				Err(error) => tracing::error!(%error, "failed to encode outbound frame; dropping it"),
			}
		}
		self.sync_queue_len();
	}

	/// Publishes the current outbound queue length into the observable
	/// snapshot, so [`crate::client::PubSubClient::publish`] can reject a
	/// send with `Backpressure` synchronously instead of round-tripping
	/// through this task.
	fn sync_queue_len(&mut self) {
		self.state.set_outbound_queue_len(self.outbound.len());
	}

	async fn send_heartbeat(&mut self) {
		self.enqueue(PacketEnvelope::Heartbeat).await;
	}

	async fn resubscribe_after_reconnect(&mut self) {
		let frames = subscription::resubscribe_frames(&mut self.state, &mut self.ack, self.options.subscription_timeout, ids::client_msg_id);
		for frame in frames {
			self.outbound.push_back(frame);
		}
		self.flush_outbound().await;
	}

	async fn handle_inbound(&mut self, message: Result<WsMessage, tokio_tungstenite::tungstenite::Error>) {
		self.heartbeat.note_inbound_traffic();

		let message = match message {
			Ok(message) => message,
			Err(error) => {
				tracing::error!(%error, "transport error; reconnecting");
				self.transition_to_error(error.to_string()).await;
				return;
			}
		};

		let text = match message {
			WsMessage::Text(text) => text,
			WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
				Ok(text) => text,
				Err(_) => {
					tracing::warn!("dropping non-utf8 binary frame");
					return;
				}
			},
			WsMessage::Close(_) => {
				tracing::warn!("gateway closed the connection; reconnecting");
				self.transition_to_error("connection closed by peer".into()).await;
				return;
			}
			WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => return,
		};

		let Some(envelope) = codec::decode(&text) else {
			return;
		};

		match envelope {
			PacketEnvelope::Publish { payload, .. } => {
				crate::processor::process_publish(&mut self.state, payload);
			}
			PacketEnvelope::Presence(frame) => {
				let status = match frame.status {
					PresenceStatusWire::Online => PresenceStatus::Online,
					PresenceStatusWire::Offline => PresenceStatus::Offline,
				};
				self.state.dispatch_presence(&PresenceEvent {
					topic: frame.topic,
					client_id: frame.client_id,
					status,
					timestamp: frame.timestamp,
				});
			}
			PacketEnvelope::Heartbeat => {}
			PacketEnvelope::Ack(ack) => self.handle_ack(ack),
			PacketEnvelope::Subscribe { .. } | PacketEnvelope::Unsubscribe { .. } => {
				tracing::warn!("ignoring client-originated packetType received from gateway");
			}
		}
	}

	fn handle_ack(&mut self, ack: codec::AckEnvelope) {
		let codec::AckEnvelope {
			client_msg_id,
			path,
			topic,
			result,
		} = ack;

		let ok = matches!(result, AckResult::PublishOk(_) | AckResult::SubscriptionOk);
		let kind = match path {
			AckPath::Publish => AckKind::Publish,
			AckPath::Subscribe => AckKind::Subscribe,
			AckPath::Unsubscribe => AckKind::Unsubscribe,
		};

		if !self.ack.resolve(&client_msg_id, path, result) {
			tracing::error!(%client_msg_id, "unsolicited ack");
			return;
		}

		if kind != AckKind::Publish {
			subscription::apply_ack_outcome(&mut self.state, kind, topic, ok);
		}
	}
}

async fn recv_ws(ws: &mut Option<WsStream>) -> Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>> {
	match ws {
		Some(stream) => stream.next().await,
		None => std::future::pending().await,
	}
}

fn epoch_millis() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}

/// Sleeps until `at`, or never resolves if `at` is `None` (paired with a
/// `select!` branch guarded by `.is_some()`).
async fn wait_until(at: Option<Instant>) {
	match at {
		Some(instant) => {
			let now = Instant::now();
			let delay = instant.saturating_duration_since(now);
			tokio::time::sleep(delay).await;
		}
		None => std::future::pending().await,
	}
}
