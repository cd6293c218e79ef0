//! Presence Dispatcher: routes presence events to per-topic handler sets.
//!
//! One ordered set of handlers per topic. Handler panics are caught and
//! logged so one bad handler can't prevent the rest from observing the
//! event (mirrors [`crate::processor`]'s isolation of message handlers).

use crate::handler::{HandlerToken, PresenceEvent, PresenceHandler};
use std::collections::HashMap;

#[derive(Default)]
pub struct PresenceDispatcher {
	handlers: HashMap<crate::topic::TopicBuf, Vec<PresenceHandler>>,
}

impl PresenceDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on(&mut self, topic: crate::topic::TopicBuf, handler: PresenceHandler) -> HandlerToken {
		let token = HandlerToken(handler.clone());
		self.handlers.entry(topic).or_default().push(handler);
		token
	}

	/// Removes the first handler equal (by `Arc` identity) to `token`.
	pub fn off(&mut self, topic: &crate::topic::TopicBuf, token: &HandlerToken) {
		if let Some(handlers) = self.handlers.get_mut(topic) {
			if let Some(pos) = handlers.iter().position(|h| token.matches(h)) {
				handlers.remove(pos);
			}
		}
	}

	pub fn clear(&mut self, topic: &crate::topic::TopicBuf) {
		self.handlers.remove(topic);
	}

	/// Invokes every handler registered for `event.topic`, in insertion
	/// order. A handler that panics is caught and logged; the remaining
	/// handlers still run.
	pub fn dispatch(&self, event: &PresenceEvent) {
		let Some(handlers) = self.handlers.get(&event.topic) else {
			return;
		};
		for handler in handlers {
			if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))) {
				tracing::warn!(topic = %event.topic, ?panic, "presence handler panicked");
			}
		}
	}

	#[cfg(test)]
	pub fn handler_count(&self, topic: &crate::topic::TopicBuf) -> usize {
		self.handlers.get(topic).map(Vec::len).unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::handler::PresenceStatus;
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	fn topic(name: &str) -> crate::topic::TopicBuf {
		crate::topic::TopicBuf::new(name).unwrap()
	}

	fn event(topic_name: &str) -> PresenceEvent {
		PresenceEvent {
			topic: topic(topic_name),
			client_id: "peer".into(),
			status: PresenceStatus::Online,
			timestamp: 0,
		}
	}

	#[test]
	fn on_then_off_leaves_handler_set_unchanged() {
		let mut dispatcher = PresenceDispatcher::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let handler: PresenceHandler = {
			let calls = Arc::clone(&calls);
			Arc::new(move |_: &PresenceEvent| {
				calls.fetch_add(1, Ordering::SeqCst);
			})
		};
		let token = dispatcher.on(topic("T1"), handler);
		assert_eq!(dispatcher.handler_count(&topic("T1")), 1);
		dispatcher.off(&topic("T1"), &token);
		assert_eq!(dispatcher.handler_count(&topic("T1")), 0);
	}

	#[test]
	fn dispatch_invokes_all_handlers_in_order() {
		let mut dispatcher = PresenceDispatcher::new();
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		for i in 0..3 {
			let order = Arc::clone(&order);
			dispatcher.on(
				topic("T1"),
				Arc::new(move |_: &PresenceEvent| order.lock().unwrap().push(i)),
			);
		}
		dispatcher.dispatch(&event("T1"));
		assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
	}

	#[test]
	fn panicking_handler_does_not_block_others() {
		let mut dispatcher = PresenceDispatcher::new();
		let calls = Arc::new(AtomicUsize::new(0));
		dispatcher.on(topic("T1"), Arc::new(|_: &PresenceEvent| panic!("boom")));
		{
			let calls = Arc::clone(&calls);
			dispatcher.on(topic("T1"), Arc::new(move |_: &PresenceEvent| {
				calls.fetch_add(1, Ordering::SeqCst);
			}));
		}
		dispatcher.dispatch(&event("T1"));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
