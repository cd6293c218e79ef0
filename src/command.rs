//! Commands sent from [`crate::client::PubSubClient`] to the connection task.
//!
//! The public facade never touches [`crate::state::StateManager`] directly;
//! it only ever holds a [`CommandTx`] and a `watch::Receiver` over the
//! current [`crate::state::ClientSnapshot`]. This splits a cheap, `Clone`-able
//! handle holding only a command sender from the background task that owns
//! all mutable state.

use crate::{
	ack::AckOutcome,
	handler::{MessageHandler, PresenceHandler},
	message::MessageBody,
	options::SubscribeOptions,
	topic::TopicBuf,
};
use tokio::sync::oneshot;

pub type CommandTx = tokio::sync::mpsc::UnboundedSender<Command>;
pub type CommandRx = tokio::sync::mpsc::UnboundedReceiver<Command>;

#[derive(Debug)]
pub struct SubscribeCommand {
	pub topic: TopicBuf,
	pub handler: MessageHandler,
	pub options: SubscribeOptions,
	pub reply: oneshot::Sender<AckOutcome<()>>,
}

#[derive(Debug)]
pub struct UnsubscribeCommand {
	pub topic: TopicBuf,
	pub reply: oneshot::Sender<AckOutcome<()>>,
}

#[derive(Debug)]
pub struct PublishCommand {
	pub topic: TopicBuf,
	pub payload: String,
	pub client_msg_id: String,
	/// `None` for fire-and-forget publishes; `Some` registers a pending ack.
	pub reply: Option<oneshot::Sender<AckOutcome<crate::ack::PublishAckOk>>>,
}

pub enum Command {
	SetChannel {
		channel: crate::channel::Channel,
	},
	Connect {
		reply: oneshot::Sender<Result<(), crate::error::Error>>,
	},
	Subscribe(SubscribeCommand),
	Unsubscribe(UnsubscribeCommand),
	Publish(PublishCommand),
	OnPresence {
		topic: TopicBuf,
		handler: PresenceHandler,
	},
	OffPresence {
		topic: TopicBuf,
		handler: crate::handler::HandlerToken,
	},
	ClearPresenceHandlers {
		topic: TopicBuf,
	},
	WaitForSubscriptionReady {
		topic: TopicBuf,
		reply: oneshot::Sender<Result<(), crate::error::Error>>,
	},
	Close {
		reply: oneshot::Sender<()>,
	},
}

impl std::fmt::Debug for Command {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::SetChannel { channel } => f.debug_struct("SetChannel").field("channel", channel).finish(),
			Self::Connect { .. } => f.debug_struct("Connect").finish_non_exhaustive(),
			Self::Subscribe(cmd) => f
				.debug_struct("Subscribe")
				.field("topic", &cmd.topic)
				.finish_non_exhaustive(),
			Self::Unsubscribe(cmd) => f
				.debug_struct("Unsubscribe")
				.field("topic", &cmd.topic)
				.finish_non_exhaustive(),
			Self::Publish(cmd) => f
				.debug_struct("Publish")
				.field("topic", &cmd.topic)
				.field("client_msg_id", &cmd.client_msg_id)
				.finish_non_exhaustive(),
			Self::OnPresence { topic, .. } => f.debug_struct("OnPresence").field("topic", topic).finish_non_exhaustive(),
			Self::OffPresence { topic, .. } => f.debug_struct("OffPresence").field("topic", topic).finish_non_exhaustive(),
			Self::ClearPresenceHandlers { topic } => f.debug_struct("ClearPresenceHandlers").field("topic", topic).finish(),
			Self::WaitForSubscriptionReady { topic, .. } => f
				.debug_struct("WaitForSubscriptionReady")
				.field("topic", topic)
				.finish_non_exhaustive(),
			Self::Close { .. } => f.debug_struct("Close").finish_non_exhaustive(),
		}
	}
}

/// Error conversion for MessageBody placeholder sentinels on outbound publish.
pub(crate) fn pending_message_body(topic: &TopicBuf, payload: String, client_msg_id: &str, client_publish_ts: i64) -> MessageBody {
	MessageBody {
		id: MessageBody::PENDING_SENTINEL.to_owned(),
		topic: topic.clone(),
		sender_id: MessageBody::PENDING_SENTINEL.to_owned(),
		seq: MessageBody::PENDING_SENTINEL.to_owned(),
		sent_at: 0,
		payload,
		client_msg_id: client_msg_id.to_owned(),
		client_publish_ts,
	}
}
