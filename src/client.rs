//! Public façade: [`PubSubClient`], the handle applications hold.
//!
//! A cheap, `Clone`-able handle holding only a [`CommandTx`] and a
//! `watch::Receiver` snapshot — all mutable state lives in the background
//! [`ConnectionTask`](crate::connection::ConnectionTask), so every clone
//! talks to the same background task rather than duplicating state.
//!
//! [`PubSubClient::publish`], handler registration
//! (`on_presence`/`off_presence`/`clear_presence_handlers`), `join_channel`,
//! and the state getters never suspend; `connect`, `subscribe`,
//! `unsubscribe`, `publish_with_ack`, `wait_for_subscription_ready`, and the
//! history operations do.

use crate::{
	ack::{AckOutcome, PublishAckOk},
	channel::Channel,
	command::{Command, CommandTx, PublishCommand, SubscribeCommand, UnsubscribeCommand},
	connection::ConnectionTask,
	error::Error,
	handler::{HandlerToken, MessageHandler, PresenceHandler},
	history::{self, HistoryIterator, HistoryPage, HistoryQuery},
	ids,
	options::{ClientOptions, SubscribeOptions},
	state::ClientSnapshot,
	topic::TopicBuf,
};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// A handle to a running pub/sub client. Cloning is cheap and every clone
/// talks to the same background connection task.
#[derive(Clone)]
pub struct PubSubClient {
	commands: CommandTx,
	snapshot: watch::Receiver<ClientSnapshot>,
	/// Kept alongside the command channel purely to drive `getHistory` /
	/// `createHistoryIterator`, which hit the history REST endpoint directly
	/// rather than going through the connection task.
	http: reqwest::Client,
	options: ClientOptions,
}

impl PubSubClient {
	/// Spawns the background connection task and returns a handle to it. The
	/// task is not told to connect; call [`Self::connect`] once a channel has
	/// been joined.
	pub fn new(options: ClientOptions) -> Self {
		let task = ConnectionTask::new(options.clone());
		let snapshot = task.state().watch();
		let (commands_tx, commands_rx) = tokio::sync::mpsc::unbounded_channel();
		tokio::spawn(task.run(commands_rx));
		Self {
			commands: commands_tx,
			snapshot,
			http: reqwest::Client::new(),
			options,
		}
	}

	/// Binds the client to `name`. Idempotent: re-joining the same channel
	/// is a no-op. Does not suspend — the
	/// channel is merely recorded; call [`Self::connect`] to actually dial.
	pub fn join_channel(&self, name: impl Into<String>) -> Result<(), Error> {
		let channel = Channel::new(name.into())?;
		self.commands.send(Command::SetChannel { channel })?;
		Ok(())
	}

	/// Opens the transport, requesting a grant and performing the WebSocket
	/// handshake if not already open. Resolves immediately if the
	/// connection is already `Open`; races with an in-flight handshake
	/// rather than starting a second one.
	pub async fn connect(&self, timeout: Option<Duration>) -> Result<(), Error> {
		let (reply, rx) = oneshot::channel();
		self.commands.send(Command::Connect { reply })?;
		if let Some(duration) = timeout {
			match tokio::time::timeout(duration, rx).await {
				Ok(inner) => inner?,
				Err(_) => Err(Error::Timeout),
			}
		} else {
			rx.await?
		}
	}

	/// Subscribes `handler` to `topic`. Validates the topic
	/// and joined-channel precondition synchronously; the returned future
	/// then suspends until the gateway acks the subscription, times out
	/// (`timeout`, defaulting to the configured subscription timeout), or
	/// the operation is cancelled by a connection close.
	pub async fn subscribe(
		&self,
		topic: impl AsRef<str>,
		handler: MessageHandler,
		options: SubscribeOptions,
		timeout: Option<Duration>,
	) -> Result<AckOutcome<()>, Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		if self.snapshot().channel.is_none() {
			return Err(Error::NotJoined);
		}
		let (reply, rx) = oneshot::channel();
		self.commands.send(Command::Subscribe(SubscribeCommand {
			topic,
			handler,
			options,
			reply,
		}))?;
		match timeout {
			Some(duration) => Ok(tokio::time::timeout(duration, rx).await.map_or(AckOutcome::Timeout, |r| r.unwrap_or(AckOutcome::Cancelled))),
			None => Ok(rx.await.unwrap_or(AckOutcome::Cancelled)),
		}
	}

	/// Unsubscribes from `topic`, clearing its handler set and suspending
	/// until the server acks the removal.
	pub async fn unsubscribe(&self, topic: impl AsRef<str>, timeout: Option<Duration>) -> Result<AckOutcome<()>, Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		let (reply, rx) = oneshot::channel();
		self.commands.send(Command::Unsubscribe(UnsubscribeCommand { topic, reply }))?;
		match timeout {
			Some(duration) => Ok(tokio::time::timeout(duration, rx).await.map_or(AckOutcome::Timeout, |r| r.unwrap_or(AckOutcome::Cancelled))),
			None => Ok(rx.await.unwrap_or(AckOutcome::Cancelled)),
		}
	}

	/// Publishes `payload` to `topic` without waiting for an ack. Does not
	/// suspend: checks the joined-channel and outbound-queue preconditions
	/// synchronously (since there is no reply channel to carry a failure
	/// back from the connection task), then generates and returns the
	/// `clientMsgId` immediately, handing the frame to the connection task
	/// to send whenever the transport is next writable.
	pub fn publish(&self, topic: impl AsRef<str>, payload: impl Into<String>) -> Result<String, Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		let snapshot = self.snapshot();
		if snapshot.channel.is_none() {
			return Err(Error::NotJoined);
		}
		if snapshot.outbound_queue_len >= crate::connection::OUTBOUND_QUEUE_CAP {
			return Err(Error::Backpressure);
		}
		let client_msg_id = ids::client_msg_id();
		self.commands.send(Command::Publish(PublishCommand {
			topic,
			payload: payload.into(),
			client_msg_id: client_msg_id.clone(),
			reply: None,
		}))?;
		Ok(client_msg_id)
	}

	/// Publishes `payload` to `topic` and suspends until the publish ack
	/// arrives, times out, or the operation is cancelled. Checks the
	/// joined-channel and outbound-queue preconditions synchronously before
	/// sending, same as [`Self::publish`].
	pub async fn publish_with_ack(
		&self,
		topic: impl AsRef<str>,
		payload: impl Into<String>,
		timeout: Option<Duration>,
	) -> Result<AckOutcome<PublishAckOk>, Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		let snapshot = self.snapshot();
		if snapshot.channel.is_none() {
			return Err(Error::NotJoined);
		}
		if snapshot.outbound_queue_len >= crate::connection::OUTBOUND_QUEUE_CAP {
			return Err(Error::Backpressure);
		}
		let client_msg_id = ids::client_msg_id();
		let (reply, rx) = oneshot::channel();
		self.commands.send(Command::Publish(PublishCommand {
			topic,
			payload: payload.into(),
			client_msg_id,
			reply: Some(reply),
		}))?;
		match timeout {
			Some(duration) => Ok(tokio::time::timeout(duration, rx).await.map_or(AckOutcome::Timeout, |r| r.unwrap_or(AckOutcome::Cancelled))),
			None => Ok(rx.await.unwrap_or(AckOutcome::Cancelled)),
		}
	}

	/// Registers a presence handler for `topic`. Does not suspend; returns a
	/// token usable with [`Self::off_presence`].
	pub fn on_presence(&self, topic: impl AsRef<str>, handler: PresenceHandler) -> Result<HandlerToken, Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		let token = HandlerToken(handler.clone());
		self.commands.send(Command::OnPresence { topic, handler })?;
		Ok(token)
	}

	/// Removes the first presence handler matching `token` by identity.
	/// Does not suspend.
	pub fn off_presence(&self, topic: impl AsRef<str>, token: HandlerToken) -> Result<(), Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		self.commands.send(Command::OffPresence { topic, handler: token })?;
		Ok(())
	}

	/// Removes every presence handler registered for `topic`. Does not
	/// suspend.
	pub fn clear_presence_handlers(&self, topic: impl AsRef<str>) -> Result<(), Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		self.commands.send(Command::ClearPresenceHandlers { topic })?;
		Ok(())
	}

	/// Suspends until `topic`'s subscription reaches `Subscribed` or
	/// `Error`, resolving immediately if it already has.
	pub async fn wait_for_subscription_ready(&self, topic: impl AsRef<str>, timeout: Option<Duration>) -> Result<(), Error> {
		let topic = TopicBuf::new(topic.as_ref())?;
		let (reply, rx) = oneshot::channel();
		self.commands.send(Command::WaitForSubscriptionReady { topic, reply })?;
		if let Some(duration) = timeout {
			match tokio::time::timeout(duration, rx).await {
				Ok(inner) => inner?,
				Err(_) => Err(Error::Timeout),
			}
		} else {
			rx.await?
		}
	}

	/// Closes the connection, failing every pending operation with
	/// `Cancelled` and transitioning to `ConnectionState::Closed`.
	pub async fn close(&self) -> Result<(), Error> {
		let (reply, rx) = oneshot::channel();
		self.commands.send(Command::Close { reply })?;
		rx.await.map_err(Error::from)
	}

	/// The current observable state. Does not suspend.
	pub fn snapshot(&self) -> ClientSnapshot {
		self.snapshot.borrow().clone()
	}

	/// A `watch::Receiver` over every future state change; dropping it is
	/// how a caller cancels observation. Does not suspend.
	pub fn watch(&self) -> watch::Receiver<ClientSnapshot> {
		self.snapshot.clone()
	}

	/// Fetches one page of `topic`'s history. Requires a channel to already
	/// be joined.
	pub async fn get_history(&self, topic: impl AsRef<str>, query: HistoryQuery) -> Result<HistoryPage, Error> {
		let channel = self.snapshot().channel.ok_or(Error::NotJoined)?;
		let topic = TopicBuf::new(topic.as_ref())?;
		history::get_history(&self.http, &self.options, &channel, &topic, &query).await
	}

	/// Builds a [`HistoryIterator`] over `topic`. Requires a channel to
	/// already be joined.
	pub fn create_history_iterator(&self, topic: impl AsRef<str>, query: HistoryQuery) -> Result<HistoryIterator<'_>, Error> {
		let channel = self.snapshot().channel.ok_or(Error::NotJoined)?;
		let topic = TopicBuf::new(topic.as_ref())?;
		Ok(HistoryIterator::new(&self.http, &self.options, channel, topic, query))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::grant::StaticToken;
	use std::sync::Arc;

	fn options() -> ClientOptions {
		ClientOptions::new("ws://127.0.0.1:1/ws", "http://127.0.0.1:1", Arc::new(StaticToken("tok".into())))
	}

	#[tokio::test]
	async fn join_channel_is_non_suspending_and_idempotent() {
		let client = PubSubClient::new(options());
		client.join_channel("room").unwrap();
		client.join_channel("room").unwrap();
		// give the task a tick to process the commands
		tokio::task::yield_now().await;
		assert_eq!(client.snapshot().channel.unwrap().as_str(), "room");
	}

	#[tokio::test]
	async fn publish_without_joined_channel_fails_fast() {
		let client = PubSubClient::new(options());
		let result = client.publish("T1", "hello");
		assert!(matches!(result, Err(Error::NotJoined)));
	}

	#[tokio::test]
	async fn publish_with_ack_without_joined_channel_fails_fast() {
		let client = PubSubClient::new(options());
		let result = client.publish_with_ack("T1", "hello", None).await;
		assert!(matches!(result, Err(Error::NotJoined)));
	}

	#[tokio::test]
	async fn subscribe_without_joined_channel_fails_fast() {
		let client = PubSubClient::new(options());
		let handler: MessageHandler = Arc::new(|_: &str, _: &crate::message::MessageContext| {});
		let result = client.subscribe("T1", handler, SubscribeOptions::default(), None).await;
		assert!(matches!(result, Err(Error::NotJoined)));
	}

	#[tokio::test]
	async fn publish_after_joining_channel_succeeds() {
		let client = PubSubClient::new(options());
		client.join_channel("room").unwrap();
		tokio::task::yield_now().await;
		let client_msg_id = client.publish("T1", "hello").unwrap();
		assert!(!client_msg_id.is_empty());
	}

	#[tokio::test]
	async fn subscribe_rejects_empty_topic_synchronously() {
		let client = PubSubClient::new(options());
		let handler: MessageHandler = Arc::new(|_: &str, _: &crate::message::MessageContext| {});
		let result = client.subscribe("", handler, SubscribeOptions::default(), None).await;
		assert!(matches!(result, Err(Error::InvalidArg(_))));
	}
}
