//! State Manager: the single owner of all mutable client state.
//!
//! Aggregates every piece of mutable client state — bound channel,
//! connection state, per-topic subscription status, message and presence
//! handler registries, and the processed-message dedup set — behind a
//! single owner: [`crate::connection::ConnectionTask`]. There is exactly one
//! task with `&mut` access to a `StateManager`, which serialises every
//! mutation without needing an actual mutex.
//!
//! Observers never get a `&StateManager`; they get a cheap, immutable
//! [`ClientSnapshot`] pushed through a `tokio::sync::watch` channel after
//! every coherent mutation. Dropping the receiver is how a caller cancels a
//! subscription — there is no separate cancel handle to manage.

use crate::{
	channel::Channel,
	error::Error,
	handler::{HandlerToken, MessageHandler, PresenceEvent, PresenceHandler},
	presence::PresenceDispatcher,
	processor::ProcessedMessageSet,
	topic::TopicBuf,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::{oneshot, watch};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Connecting,
	Open,
	Closing,
	Closed,
	Error,
}

impl ConnectionState {
	pub fn is_connected(self) -> bool {
		matches!(self, Self::Open)
	}
}

/// Per-topic subscription lifecycle. The only legal transitions are
/// `unsubscribed -> pending -> subscribed|error -> unsubscribed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
	Unsubscribed,
	Pending,
	Subscribed,
	Error,
}

/// An immutable, cheap-to-clone copy of the client's observable state.
/// Returned from [`StateManager::snapshot`] and pushed to
/// every `watch::Receiver` obtained via [`StateManager::watch`].
#[derive(Clone, Debug)]
pub struct ClientSnapshot {
	pub channel: Option<Channel>,
	pub connection_state: ConnectionState,
	pub subscriptions: HashMap<TopicBuf, SubscriptionStatus>,
	pub pending_subscriptions: HashSet<TopicBuf>,
	/// Count, not contents: the dedup set exists to suppress duplicate
	/// handler invocations, not to be enumerated by observers.
	pub processed_message_count: usize,
	/// Number of frames currently buffered in the connection task's
	/// outbound queue. Lets [`crate::client::PubSubClient::publish`] reject
	/// a send with `Backpressure` synchronously instead of round-tripping
	/// through the task.
	pub outbound_queue_len: usize,
	pub error: Option<String>,
}

impl ClientSnapshot {
	pub fn is_connected(&self) -> bool {
		self.connection_state.is_connected()
	}

	pub fn is_readable(&self) -> bool {
		self.is_connected()
	}

	pub fn is_writable(&self) -> bool {
		self.is_connected()
	}

	fn empty() -> Self {
		Self {
			channel: None,
			connection_state: ConnectionState::Idle,
			subscriptions: HashMap::new(),
			pending_subscriptions: HashSet::new(),
			processed_message_count: 0,
			outbound_queue_len: 0,
			error: None,
		}
	}
}

pub struct StateManager {
	channel: Option<Channel>,
	connection_state: ConnectionState,
	subscriptions: HashMap<TopicBuf, SubscriptionStatus>,
	/// The `streamOldMessages` flag each topic was last subscribed with,
	/// kept so a reconnect's re-subscribe can preserve it per spec.md
	/// §4.G. Populated in [`Self::set_stream_old_messages`], cleared on
	/// [`Self::remove_subscription`].
	stream_old_messages: HashMap<TopicBuf, bool>,
	message_handlers: HashMap<TopicBuf, Vec<MessageHandler>>,
	processed: ProcessedMessageSet,
	ready_waiters: HashMap<TopicBuf, Vec<oneshot::Sender<Result<(), Error>>>>,
	presence: PresenceDispatcher,
	outbound_queue_len: usize,
	error: Option<String>,
	snapshot_tx: watch::Sender<ClientSnapshot>,
}

impl StateManager {
	pub fn new() -> Self {
		let (snapshot_tx, _) = watch::channel(ClientSnapshot::empty());
		Self {
			channel: None,
			connection_state: ConnectionState::Idle,
			subscriptions: HashMap::new(),
			stream_old_messages: HashMap::new(),
			message_handlers: HashMap::new(),
			processed: ProcessedMessageSet::new(4096),
			ready_waiters: HashMap::new(),
			presence: PresenceDispatcher::new(),
			outbound_queue_len: 0,
			error: None,
			snapshot_tx,
		}
	}

	/// Subscribes to change notifications. The returned receiver always
	/// yields the current snapshot first, then one per mutation.
	pub fn watch(&self) -> watch::Receiver<ClientSnapshot> {
		self.snapshot_tx.subscribe()
	}

	pub fn snapshot(&self) -> ClientSnapshot {
		self.snapshot_tx.borrow().clone()
	}

	fn publish_snapshot(&mut self) {
		let snapshot = ClientSnapshot {
			channel: self.channel.clone(),
			connection_state: self.connection_state,
			subscriptions: self.subscriptions.clone(),
			pending_subscriptions: self
				.subscriptions
				.iter()
				.filter(|(_, status)| **status == SubscriptionStatus::Pending)
				.map(|(topic, _)| topic.clone())
				.collect(),
			processed_message_count: self.processed.len(),
			outbound_queue_len: self.outbound_queue_len,
			error: self.error.clone(),
		};
		// A `watch` send only fails when every receiver (including the one
		// this manager could hold) has been dropped; an unobserved state
		// change is not an error worth surfacing.
		let _ = self.snapshot_tx.send(snapshot);
	}

	pub fn channel(&self) -> Option<&Channel> {
		self.channel.as_ref()
	}

	/// Sets the bound channel. Idempotent: setting the same channel again is
	/// a no-op.
	pub fn set_channel(&mut self, channel: Channel) {
		if self.channel.as_ref() == Some(&channel) {
			return;
		}
		self.channel = Some(channel);
		self.publish_snapshot();
	}

	pub fn connection_state(&self) -> ConnectionState {
		self.connection_state
	}

	pub fn set_connection_state(&mut self, state: ConnectionState) {
		self.connection_state = state;
		self.publish_snapshot();
	}

	pub fn set_error(&mut self, error: Option<String>) {
		self.error = error;
		self.publish_snapshot();
	}

	/// Records the connection task's current outbound queue length, so
	/// [`ClientSnapshot::outbound_queue_len`] reflects it for synchronous
	/// backpressure checks on the client side.
	pub fn set_outbound_queue_len(&mut self, len: usize) {
		if self.outbound_queue_len == len {
			return;
		}
		self.outbound_queue_len = len;
		self.publish_snapshot();
	}

	pub fn subscription_status(&self, topic: &TopicBuf) -> SubscriptionStatus {
		self.subscriptions.get(topic).copied().unwrap_or(SubscriptionStatus::Unsubscribed)
	}

	pub fn set_subscription_status(&mut self, topic: TopicBuf, status: SubscriptionStatus) {
		match status {
			SubscriptionStatus::Subscribed => {
				if let Some(waiters) = self.ready_waiters.remove(&topic) {
					for waiter in waiters {
						let _ = waiter.send(Ok(()));
					}
				}
			}
			SubscriptionStatus::Error => {
				if let Some(waiters) = self.ready_waiters.remove(&topic) {
					for waiter in waiters {
						let _ = waiter.send(Err(Error::Decode("subscription entered error state".into())));
					}
				}
			}
			_ => {}
		}
		self.subscriptions.insert(topic, status);
		self.publish_snapshot();
	}

	pub fn remove_subscription(&mut self, topic: &TopicBuf) {
		self.subscriptions.remove(topic);
		self.message_handlers.remove(topic);
		self.stream_old_messages.remove(topic);
		self.publish_snapshot();
	}

	/// Topics currently `Subscribed` or `Pending`; used to drive re-subscribe
	/// after a reconnect.
	pub fn topics_to_resubscribe(&self) -> Vec<TopicBuf> {
		self.subscriptions
			.iter()
			.filter(|(_, status)| matches!(status, SubscriptionStatus::Subscribed | SubscriptionStatus::Pending))
			.map(|(topic, _)| topic.clone())
			.collect()
	}

	pub fn add_message_handler(&mut self, topic: TopicBuf, handler: MessageHandler) {
		self.message_handlers.entry(topic).or_default().push(handler);
	}

	pub fn clear_message_handlers(&mut self, topic: &TopicBuf) {
		self.message_handlers.remove(topic);
	}

	/// Records the `streamOldMessages` flag a topic was just subscribed
	/// with, so a later reconnect can re-issue the subscribe with the same
	/// flag (spec.md §4.G).
	pub fn set_stream_old_messages(&mut self, topic: TopicBuf, stream_old_messages: bool) {
		self.stream_old_messages.insert(topic, stream_old_messages);
	}

	/// The `streamOldMessages` flag last recorded for `topic`, or `false` if
	/// it was never subscribed with one set.
	pub fn stream_old_messages(&self, topic: &TopicBuf) -> bool {
		self.stream_old_messages.get(topic).copied().unwrap_or(false)
	}

	pub fn message_handlers(&self, topic: &TopicBuf) -> &[MessageHandler] {
		self.message_handlers.get(topic).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn processed_mut(&mut self) -> &mut ProcessedMessageSet {
		&mut self.processed
	}

	pub fn on_presence(&mut self, topic: TopicBuf, handler: PresenceHandler) -> HandlerToken {
		self.presence.on(topic, handler)
	}

	pub fn off_presence(&mut self, topic: &TopicBuf, token: &HandlerToken) {
		self.presence.off(topic, token)
	}

	pub fn clear_presence_handlers(&mut self, topic: &TopicBuf) {
		self.presence.clear(topic)
	}

	pub fn dispatch_presence(&self, event: &PresenceEvent) {
		self.presence.dispatch(event)
	}

	/// Registers a waiter resolved by [`Self::set_subscription_status`] once
	/// `topic` reaches `Subscribed` or `Error`. If `topic` is already
	/// `Subscribed`, resolves immediately.
	pub fn wait_for_subscription_ready(&mut self, topic: TopicBuf, reply: oneshot::Sender<Result<(), Error>>) {
		match self.subscription_status(&topic) {
			SubscriptionStatus::Subscribed => {
				let _ = reply.send(Ok(()));
			}
			SubscriptionStatus::Error => {
				let _ = reply.send(Err(Error::Decode("subscription is in error state".into())));
			}
			_ => {
				self.ready_waiters.entry(topic).or_default().push(reply);
			}
		}
	}

	/// Fails every registered `waitForSubscriptionReady` waiter with
	/// `Cancelled` (used on [`ConnectionState::Closed`]).
	pub fn cancel_ready_waiters(&mut self) {
		for (_, waiters) in self.ready_waiters.drain() {
			for waiter in waiters {
				let _ = waiter.send(Err(Error::Cancelled));
			}
		}
	}
}

impl Default for StateManager {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn topic(name: &str) -> TopicBuf {
		TopicBuf::new(name).unwrap()
	}

	#[test]
	fn set_channel_is_idempotent() {
		let mut state = StateManager::new();
		state.set_channel(Channel::new("room").unwrap());
		let snapshot_before = state.snapshot();
		state.set_channel(Channel::new("room").unwrap());
		let snapshot_after = state.snapshot();
		assert_eq!(snapshot_before.channel, snapshot_after.channel);
	}

	#[test]
	fn subscription_status_defaults_to_unsubscribed() {
		let state = StateManager::new();
		assert_eq!(state.subscription_status(&topic("T1")), SubscriptionStatus::Unsubscribed);
	}

	#[tokio::test]
	async fn wait_for_subscription_ready_resolves_on_subscribed() {
		let mut state = StateManager::new();
		let (tx, rx) = oneshot::channel();
		state.wait_for_subscription_ready(topic("T1"), tx);
		state.set_subscription_status(topic("T1"), SubscriptionStatus::Pending);
		state.set_subscription_status(topic("T1"), SubscriptionStatus::Subscribed);
		assert!(rx.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn cancel_ready_waiters_fails_pending_waiters() {
		let mut state = StateManager::new();
		let (tx, rx) = oneshot::channel();
		state.wait_for_subscription_ready(topic("T1"), tx);
		state.cancel_ready_waiters();
		assert!(matches!(rx.await.unwrap(), Err(Error::Cancelled)));
	}

	#[test]
	fn topics_to_resubscribe_includes_subscribed_and_pending_only() {
		let mut state = StateManager::new();
		state.set_subscription_status(topic("A"), SubscriptionStatus::Subscribed);
		state.set_subscription_status(topic("B"), SubscriptionStatus::Pending);
		state.set_subscription_status(topic("C"), SubscriptionStatus::Unsubscribed);
		let mut topics = state.topics_to_resubscribe();
		topics.sort_by(|a, b| a.as_str().cmp(b.as_str()));
		assert_eq!(topics, vec![topic("A"), topic("B")]);
	}
}
