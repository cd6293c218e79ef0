use crate::message::MessageContext;
use std::sync::Arc;

/// A message handler: invoked with the decoded payload and its context for
/// every inbound publish on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(&str, &MessageContext) + Send + Sync>;

/// Presence status reported by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
	Online,
	Offline,
}

/// A presence event delivered to presence handlers.
#[derive(Clone, Debug)]
pub struct PresenceEvent {
	pub topic: crate::topic::TopicBuf,
	pub client_id: String,
	pub status: PresenceStatus,
	pub timestamp: i64,
}

/// A presence handler.
pub type PresenceHandler = Arc<dyn Fn(&PresenceEvent) + Send + Sync>;

/// Identity used to remove a previously registered handler.
///
/// Handlers are plain closures, which have no intrinsic equality in Rust.
/// Removing "the first equal handler" is expressed as pointer identity of
/// the `Arc` the caller registered with, so callers that want to unregister
/// a handler must keep the `Arc` (or this token, which is cheaper to clone
/// and carry around) returned from `on_presence`.
#[derive(Clone, Debug)]
pub struct HandlerToken(pub(crate) PresenceHandler);

impl HandlerToken {
	pub(crate) fn matches(&self, other: &PresenceHandler) -> bool {
		Arc::ptr_eq(&self.0, other)
	}
}
