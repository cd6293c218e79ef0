//! Ack Manager: correlates client operations with server acknowledgements.
//!
//! Correlates a `clientMsgId` assigned at send time with the server's `ack`
//! frame (or a local timeout / cancellation). One pending entry exists per
//! outstanding `(publish | subscribe | unsubscribe)` operation; resolving an
//! entry always consumes it, so at most one of
//! `{ack-success, ack-error, timeout, cancelled}` ever reaches the waiter.

use crate::{codec::AckResult, topic::TopicBuf};
use std::{collections::HashMap, time::Instant};
use tokio::sync::oneshot;

/// The outcome delivered to a pending ack's waiter.
#[derive(Debug)]
pub enum AckOutcome<T> {
	Ok(T),
	Err { code: String, message: String },
	Timeout,
	Cancelled,
}

/// Success payload for a publish ack.
#[derive(Clone, Debug)]
pub struct PublishAckOk {
	pub seq: String,
	pub server_msg_id: String,
	pub t_ingress: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckKind {
	Publish,
	Subscribe,
	Unsubscribe,
}

enum Waiter {
	Publish(oneshot::Sender<AckOutcome<PublishAckOk>>),
	Subscription(oneshot::Sender<AckOutcome<()>>),
}

struct PendingOp {
	kind: AckKind,
	#[allow(dead_code)] // kept for diagnostics / future topic-scoped cancellation
	topic: TopicBuf,
	deadline: Instant,
	waiter: Waiter,
}

/// Maintains the `clientMsgId -> pending operation` correlation table.
#[derive(Default)]
pub struct AckManager {
	pending: HashMap<String, PendingOp>,
}

impl AckManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_publish(
		&mut self,
		client_msg_id: String,
		topic: TopicBuf,
		deadline: Instant,
		reply: oneshot::Sender<AckOutcome<PublishAckOk>>,
	) {
		self.pending.insert(
			client_msg_id,
			PendingOp {
				kind: AckKind::Publish,
				topic,
				deadline,
				waiter: Waiter::Publish(reply),
			},
		);
	}

	pub fn register_subscription(
		&mut self,
		client_msg_id: String,
		kind: AckKind,
		topic: TopicBuf,
		deadline: Instant,
		reply: oneshot::Sender<AckOutcome<()>>,
	) {
		debug_assert!(matches!(kind, AckKind::Subscribe | AckKind::Unsubscribe));
		self.pending.insert(
			client_msg_id,
			PendingOp {
				kind,
				topic,
				deadline,
				waiter: Waiter::Subscription(reply),
			},
		);
	}

	/// Resolves the pending entry for `client_msg_id` against a decoded ack
	/// result. Returns `true` if an entry was found (the caller logs at
	/// `error` for unsolicited acks when this is `false`).
	pub fn resolve(&mut self, client_msg_id: &str, path: crate::codec::AckPath, result: AckResult) -> bool {
		let Some(op) = self.pending.remove(client_msg_id) else {
			return false;
		};

		let expected = match path {
			crate::codec::AckPath::Publish => AckKind::Publish,
			crate::codec::AckPath::Subscribe => AckKind::Subscribe,
			crate::codec::AckPath::Unsubscribe => AckKind::Unsubscribe,
		};
		if expected != op.kind {
			tracing::warn!(%client_msg_id, "ack path does not match pending operation kind");
		}

		match (op.waiter, result) {
			(Waiter::Publish(reply), AckResult::PublishOk(ok)) => {
				let _ = reply.send(AckOutcome::Ok(PublishAckOk {
					seq: ok.seq,
					server_msg_id: ok.server_msg_id,
					t_ingress: ok.t_ingress,
				}));
			}
			(Waiter::Publish(reply), AckResult::Err(err)) => {
				let _ = reply.send(AckOutcome::Err {
					code: err.code,
					message: err.message,
				});
			}
			(Waiter::Subscription(reply), AckResult::SubscriptionOk) => {
				let _ = reply.send(AckOutcome::Ok(()));
			}
			(Waiter::Subscription(reply), AckResult::Err(err)) => {
				let _ = reply.send(AckOutcome::Err {
					code: err.code,
					message: err.message,
				});
			}
			(Waiter::Publish(reply), AckResult::SubscriptionOk) => {
				tracing::error!(%client_msg_id, "subscription-shaped ack for a pending publish");
				let _ = reply.send(AckOutcome::Err {
					code: "PROTOCOL_ERROR".into(),
					message: "subscription ack for a publish".into(),
				});
			}
			(Waiter::Subscription(reply), AckResult::PublishOk(_)) => {
				tracing::error!(%client_msg_id, "publish-shaped ack for a pending subscription");
				let _ = reply.send(AckOutcome::Err {
					code: "PROTOCOL_ERROR".into(),
					message: "publish ack for a subscription".into(),
				});
			}
		}

		true
	}

	/// Evicts and fails every entry whose deadline has passed, returning how
	/// many were evicted.
	pub fn evict_expired(&mut self, now: Instant) -> usize {
		let expired: Vec<String> = self
			.pending
			.iter()
			.filter(|(_, op)| op.deadline <= now)
			.map(|(id, _)| id.clone())
			.collect();

		for id in &expired {
			if let Some(op) = self.pending.remove(id) {
				match op.waiter {
					Waiter::Publish(reply) => {
						let _ = reply.send(AckOutcome::Timeout);
					}
					Waiter::Subscription(reply) => {
						let _ = reply.send(AckOutcome::Timeout);
					}
				}
			}
		}
		expired.len()
	}

	/// The earliest deadline among pending entries, if any. Not currently
	/// read by `ConnectionTask` (its sweep runs on a fixed 250ms tick
	/// instead of sizing itself to the next deadline) but kept for a future
	/// adaptive-sweep change.
	#[allow(dead_code)]
	pub fn next_deadline(&self) -> Option<Instant> {
		self.pending.values().map(|op| op.deadline).min()
	}

	/// Fails every pending entry with `Cancelled`. Called on connection close.
	pub fn cancel_all(&mut self) {
		for (_, op) in self.pending.drain() {
			match op.waiter {
				Waiter::Publish(reply) => {
					let _ = reply.send(AckOutcome::Cancelled);
				}
				Waiter::Subscription(reply) => {
					let _ = reply.send(AckOutcome::Cancelled);
				}
			}
		}
	}

	pub fn len(&self) -> usize {
		self.pending.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}
}
