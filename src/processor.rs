//! Message Processor: dedup, parse, and dispatch incoming payloads.
//!
//! Deduplicates inbound publishes by `id` and fans each surviving message
//! out to every handler registered for its topic. Handler panics are caught
//! and logged in place, matching [`crate::presence::PresenceDispatcher`]'s
//! isolation policy — one bad handler must not stop the rest from running.

use crate::{
	handler::MessageHandler,
	message::{MessageBody, MessageContext},
	state::StateManager,
};
use std::collections::{HashSet, VecDeque};

/// A bounded set of recently observed message ids, used to suppress
/// duplicate deliveries after reconnect replay. Oldest entries are evicted,
/// by insertion order, once `capacity` is exceeded.
pub struct ProcessedMessageSet {
	capacity: usize,
	order: VecDeque<String>,
	members: HashSet<String>,
}

impl ProcessedMessageSet {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			order: VecDeque::with_capacity(capacity.min(1024)),
			members: HashSet::with_capacity(capacity.min(1024)),
		}
	}

	/// Returns `true` if `id` was already present (i.e. this is a
	/// duplicate); otherwise inserts it, evicting the oldest entry if the
	/// set is at capacity.
	pub fn check_and_insert(&mut self, id: &str) -> bool {
		if self.members.contains(id) {
			return true;
		}
		if self.order.len() >= self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.members.remove(&oldest);
			}
		}
		self.order.push_back(id.to_owned());
		self.members.insert(id.to_owned());
		false
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}
}

/// Processes one inbound `publish` envelope against `state`:
///
/// 1. Drop it if `id` has already been seen (cross-reconnect replay dedup).
/// 2. Otherwise record `id` and look up the topic's handler set.
/// 3. Invoke every handler in order, in isolation.
///
/// A message with no `id` (the field is empty) cannot be deduplicated and is
/// processed unconditionally.
pub fn process_publish(state: &mut StateManager, message: MessageBody) {
	if !message.id.is_empty() {
		if state.processed_mut().check_and_insert(&message.id) {
			tracing::warn!(id = %message.id, topic = %message.topic, "dropping duplicate publish");
			return;
		}
	} else {
		tracing::warn!(topic = %message.topic, "publish has no id; processing without dedup");
	}

	let handlers = state.message_handlers(&message.topic);
	if handlers.is_empty() {
		tracing::warn!(topic = %message.topic, "no handlers registered for topic; dropping");
		return;
	}

	let context = MessageContext {
		topic: message.topic.clone(),
		seq: message.seq.clone(),
		sent_at: message.sent_at,
	};

	invoke_handlers(handlers, &message.payload, &context);
}

fn invoke_handlers(handlers: &[MessageHandler], payload: &str, context: &MessageContext) {
	for handler in handlers {
		if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(payload, context))) {
			tracing::warn!(topic = %context.topic, ?panic, "message handler panicked");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::topic::TopicBuf;
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	fn message(id: &str, topic: &str) -> MessageBody {
		MessageBody {
			id: id.into(),
			topic: TopicBuf::new(topic).unwrap(),
			sender_id: "sender".into(),
			seq: "1".into(),
			sent_at: 0,
			payload: "hello".into(),
			client_msg_id: "c1".into(),
			client_publish_ts: 0,
		}
	}

	#[test]
	fn duplicate_message_is_invoked_at_most_once() {
		let mut state = StateManager::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let handler: MessageHandler = {
			let calls = Arc::clone(&calls);
			Arc::new(move |_: &str, _: &MessageContext| {
				calls.fetch_add(1, Ordering::SeqCst);
			})
		};
		state.add_message_handler(TopicBuf::new("T1").unwrap(), handler);

		process_publish(&mut state, message("m1", "T1"));
		process_publish(&mut state, message("m1", "T1"));

		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn message_with_no_handlers_is_dropped_without_panic() {
		let mut state = StateManager::new();
		process_publish(&mut state, message("m1", "T1"));
	}

	#[test]
	fn bounded_set_evicts_oldest_first() {
		let mut set = ProcessedMessageSet::new(2);
		assert!(!set.check_and_insert("a"));
		assert!(!set.check_and_insert("b"));
		assert!(!set.check_and_insert("c")); // evicts "a"
		assert!(!set.check_and_insert("a")); // "a" was evicted, treated as new
		assert!(set.check_and_insert("c"));
	}

	#[test]
	fn empty_id_is_processed_unconditionally() {
		let mut state = StateManager::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let handler: MessageHandler = {
			let calls = Arc::clone(&calls);
			Arc::new(move |_: &str, _: &MessageContext| {
				calls.fetch_add(1, Ordering::SeqCst);
			})
		};
		state.add_message_handler(TopicBuf::new("T1").unwrap(), handler);
		process_publish(&mut state, message("", "T1"));
		process_publish(&mut state, message("", "T1"));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
