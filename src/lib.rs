//! `erebus-client`: a real-time pub/sub client over a WebSocket gateway.
//!
//! A single [`PubSubClient`] handle is bound to one channel, at most one
//! active transport, and an arbitrary number of topic subscriptions and
//! presence handlers. All mutable state lives in a background connection
//! task; the handle itself is a cheap `Clone` over an unbounded command
//! channel.

mod ack;
mod backoff;
mod channel;
mod client;
mod codec;
mod command;
mod connection;
mod error;
mod grant;
mod handler;
mod heartbeat;
mod history;
mod ids;
mod message;
mod options;
mod presence;
mod processor;
mod schema;
mod state;
mod subscription;
mod topic;

pub use ack::{AckOutcome, PublishAckOk};
pub use channel::Channel;
pub use client::PubSubClient;
pub use error::{Error, Result};
pub use grant::{CachedGrant, GrantCache, ProcessGrantCache, StaticToken, TokenProvider};
pub use handler::{HandlerToken, MessageHandler, PresenceEvent, PresenceHandler, PresenceStatus};
pub use history::{Direction, HistoryBatch, HistoryIterator, HistoryPage, HistoryQuery};
pub use message::{MessageBody, MessageContext};
pub use options::{ClientOptions, SubscribeOptions};
pub use schema::{SchemaValidator, TypedFacade, TypedMessageHandler};
pub use state::{ClientSnapshot, ConnectionState, SubscriptionStatus};
pub use topic::{Topic, TopicBuf};
