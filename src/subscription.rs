//! Subscription Manager: per-topic subscription status and pending acks.
//!
//! Pure request-building functions over [`StateManager`] and
//! [`AckManager`]: each one records the client's intent (handler
//! registration, status transition, pending ack) and hands back the
//! [`PacketEnvelope`] the caller (`ConnectionTask`, in `connection.rs`) must
//! write to the transport. Keeping the frame construction here — rather
//! than inline in the task loop — is what lets re-subscribe-after-reconnect
//! reuse exactly the same logic a fresh `subscribe()` call uses.

use crate::{
	ack::{AckKind, AckManager},
	codec::PacketEnvelope,
	error::Error,
	handler::MessageHandler,
	options::SubscribeOptions,
	state::{StateManager, SubscriptionStatus},
	topic::TopicBuf,
};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Validates and begins a subscribe operation: registers the handler, marks
/// the topic `pending`, registers the pending ack, and returns the
/// `subscribe` frame to transmit.
pub fn begin_subscribe(
	state: &mut StateManager,
	ack: &mut AckManager,
	topic: TopicBuf,
	handler: MessageHandler,
	options: SubscribeOptions,
	timeout: Duration,
	client_msg_id: String,
	reply: oneshot::Sender<crate::ack::AckOutcome<()>>,
) -> Result<PacketEnvelope, Error> {
	state.add_message_handler(topic.clone(), handler);
	state.set_stream_old_messages(topic.clone(), options.stream_old_messages);
	state.set_subscription_status(topic.clone(), SubscriptionStatus::Pending);
	ack.register_subscription(
		client_msg_id.clone(),
		AckKind::Subscribe,
		topic.clone(),
		Instant::now() + timeout,
		reply,
	);

	Ok(PacketEnvelope::Subscribe {
		topic,
		client_msg_id: Some(client_msg_id),
		stream_old_messages: options.stream_old_messages,
	})
}

/// Begins an unsubscribe operation, mirroring the subscribe flow: clears
/// the handler set, registers the pending ack, and returns the
/// `unsubscribe` frame to transmit. The subscription status is left as-is
/// until the ack lands; `ConnectionTask` transitions it to `Unsubscribed` on
/// success.
pub fn begin_unsubscribe(
	state: &mut StateManager,
	ack: &mut AckManager,
	topic: TopicBuf,
	timeout: Duration,
	client_msg_id: String,
	reply: oneshot::Sender<crate::ack::AckOutcome<()>>,
) -> PacketEnvelope {
	state.clear_message_handlers(&topic);
	ack.register_subscription(
		client_msg_id.clone(),
		AckKind::Unsubscribe,
		topic.clone(),
		Instant::now() + timeout,
		reply,
	);

	PacketEnvelope::Unsubscribe {
		topic,
		client_msg_id: Some(client_msg_id),
	}
}

/// Builds the re-subscribe frames issued after a successful reconnection:
/// every topic that was `Subscribed` or `Pending` before the disconnect
/// re-enters `Pending` and gets a fresh `subscribe` frame, preserving the
/// `stream_old_messages` flag it was originally subscribed with (spec.md
/// §4.G: re-subscribe "MUST re-issue a subscribe frame (preserving
/// streamOldMessages)").
pub fn resubscribe_frames(
	state: &mut StateManager,
	ack: &mut AckManager,
	timeout: Duration,
	mut next_client_msg_id: impl FnMut() -> String,
) -> Vec<PacketEnvelope> {
	let topics = state.topics_to_resubscribe();
	let mut frames = Vec::with_capacity(topics.len());

	for topic in topics {
		let stream_old_messages = state.stream_old_messages(&topic);
		state.set_subscription_status(topic.clone(), SubscriptionStatus::Pending);
		let client_msg_id = next_client_msg_id();
		// Re-subscribes are fire-and-forget from the caller's perspective;
		// any ack.error simply re-enters `Error`, same as a fresh subscribe.
		let (reply, _rx) = oneshot::channel();
		ack.register_subscription(client_msg_id.clone(), AckKind::Subscribe, topic.clone(), Instant::now() + timeout, reply);
		frames.push(PacketEnvelope::Subscribe {
			topic,
			client_msg_id: Some(client_msg_id),
			stream_old_messages,
		});
	}

	frames
}

/// Applies a resolved subscribe/unsubscribe ack outcome to subscription
/// status. Called by `ConnectionTask` after `AckManager::resolve` succeeds.
pub fn apply_ack_outcome(state: &mut StateManager, kind: AckKind, topic: TopicBuf, ok: bool) {
	match (kind, ok) {
		(AckKind::Subscribe, true) => state.set_subscription_status(topic, SubscriptionStatus::Subscribed),
		(AckKind::Subscribe, false) => state.set_subscription_status(topic, SubscriptionStatus::Error),
		(AckKind::Unsubscribe, true) => state.remove_subscription(&topic),
		(AckKind::Unsubscribe, false) => state.set_subscription_status(topic, SubscriptionStatus::Error),
		(AckKind::Publish, _) => unreachable!("publish acks are not routed through apply_ack_outcome"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::MessageContext;

	fn topic(name: &str) -> TopicBuf {
		TopicBuf::new(name).unwrap()
	}

	#[test]
	fn begin_subscribe_marks_pending_and_registers_handler() {
		let mut state = StateManager::new();
		let mut ack = AckManager::new();
		let (reply, _rx) = oneshot::channel();
		let handler: MessageHandler = std::sync::Arc::new(|_: &str, _: &MessageContext| {});

		let frame = begin_subscribe(
			&mut state,
			&mut ack,
			topic("T1"),
			handler,
			SubscribeOptions::default(),
			Duration::from_secs(10),
			"c1".into(),
			reply,
		)
		.unwrap();

		assert_eq!(state.subscription_status(&topic("T1")), SubscriptionStatus::Pending);
		assert_eq!(ack.len(), 1);
		assert!(matches!(frame, PacketEnvelope::Subscribe { .. }));
	}

	#[test]
	fn apply_ack_outcome_transitions_to_subscribed() {
		let mut state = StateManager::new();
		state.set_subscription_status(topic("T1"), SubscriptionStatus::Pending);
		apply_ack_outcome(&mut state, AckKind::Subscribe, topic("T1"), true);
		assert_eq!(state.subscription_status(&topic("T1")), SubscriptionStatus::Subscribed);
	}

	#[test]
	fn resubscribe_frames_covers_subscribed_and_pending_topics() {
		let mut state = StateManager::new();
		let mut ack = AckManager::new();
		state.set_subscription_status(topic("A"), SubscriptionStatus::Subscribed);
		state.set_subscription_status(topic("B"), SubscriptionStatus::Pending);
		state.set_subscription_status(topic("C"), SubscriptionStatus::Unsubscribed);

		let mut counter = 0u32;
		let frames = resubscribe_frames(&mut state, &mut ack, Duration::from_secs(10), || {
			counter += 1;
			format!("resub-{counter}")
		});

		assert_eq!(frames.len(), 2);
		assert_eq!(state.subscription_status(&topic("A")), SubscriptionStatus::Pending);
		assert_eq!(state.subscription_status(&topic("B")), SubscriptionStatus::Pending);
	}

	#[test]
	fn resubscribe_frames_preserve_stream_old_messages_per_topic() {
		let mut state = StateManager::new();
		let mut ack = AckManager::new();
		let handler: MessageHandler = std::sync::Arc::new(|_: &str, _: &MessageContext| {});

		let (reply_a, _rx_a) = oneshot::channel();
		begin_subscribe(
			&mut state,
			&mut ack,
			topic("A"),
			handler.clone(),
			SubscribeOptions { stream_old_messages: true },
			Duration::from_secs(10),
			"c-a".into(),
			reply_a,
		)
		.unwrap();
		apply_ack_outcome(&mut state, AckKind::Subscribe, topic("A"), true);

		let (reply_b, _rx_b) = oneshot::channel();
		begin_subscribe(
			&mut state,
			&mut ack,
			topic("B"),
			handler,
			SubscribeOptions { stream_old_messages: false },
			Duration::from_secs(10),
			"c-b".into(),
			reply_b,
		)
		.unwrap();
		apply_ack_outcome(&mut state, AckKind::Subscribe, topic("B"), true);

		let mut counter = 0u32;
		let mut frames = resubscribe_frames(&mut state, &mut ack, Duration::from_secs(10), || {
			counter += 1;
			format!("resub-{counter}")
		});
		frames.sort_by(|a, b| match (a, b) {
			(PacketEnvelope::Subscribe { topic: ta, .. }, PacketEnvelope::Subscribe { topic: tb, .. }) => {
				ta.as_str().cmp(tb.as_str())
			}
			_ => std::cmp::Ordering::Equal,
		});

		match &frames[0] {
			PacketEnvelope::Subscribe { topic, stream_old_messages, .. } => {
				assert_eq!(topic.as_str(), "A");
				assert!(*stream_old_messages);
			}
			_ => panic!("expected subscribe frame"),
		}
		match &frames[1] {
			PacketEnvelope::Subscribe { topic, stream_old_messages, .. } => {
				assert_eq!(topic.as_str(), "B");
				assert!(!*stream_old_messages);
			}
			_ => panic!("expected subscribe frame"),
		}
	}
}
