use crate::grant::{GrantCache, TokenProvider};
use std::{sync::Arc, time::Duration};

/// Configuration record for a [`crate::client::PubSubClient`].
///
/// The crate reads no environment variables directly; every endpoint and
/// timeout is passed in here.
#[derive(Clone)]
pub struct ClientOptions {
	/// WebSocket URL of the gateway, e.g. `wss://gateway.example.com/ws`.
	pub ws_url: String,
	/// Base URL of the authorization server used for grant requests.
	pub auth_base_url: String,
	/// Base URL used for history requests; defaults to `auth_base_url`.
	pub http_base_url: Option<String>,
	/// Supplies the bearer credential used to call the grant endpoint.
	pub token_provider: Arc<dyn TokenProvider>,
	/// Optional process-wide grant cache layer.
	pub grant_cache: Option<Arc<dyn GrantCache>>,
	pub heartbeat: Duration,
	pub debug: bool,
	pub connection_timeout: Option<Duration>,
	pub subscription_timeout: Duration,
	pub publish_ack_timeout: Duration,
	pub enable_caching: bool,
}

impl ClientOptions {
	pub fn new(ws_url: impl Into<String>, auth_base_url: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Self {
		Self {
			ws_url: ws_url.into(),
			auth_base_url: auth_base_url.into(),
			http_base_url: None,
			token_provider,
			grant_cache: None,
			heartbeat: Duration::from_secs(25),
			debug: false,
			connection_timeout: None,
			subscription_timeout: Duration::from_secs(10),
			publish_ack_timeout: Duration::from_secs(3),
			enable_caching: true,
		}
	}

	pub(crate) fn http_base(&self) -> &str {
		self.http_base_url.as_deref().unwrap_or(&self.auth_base_url)
	}
}

/// Per-call options for [`crate::client::PubSubClient::subscribe`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscribeOptions {
	/// If set, asks the gateway to replay messages older than the
	/// subscription instant through the normal publish path. The client
	/// does not know, and need not know, which delivery path the gateway
	/// chooses for replayed messages.
	pub stream_old_messages: bool,
}

impl std::fmt::Debug for ClientOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientOptions")
			.field("ws_url", &self.ws_url)
			.field("auth_base_url", &self.auth_base_url)
			.field("http_base_url", &self.http_base_url)
			.field("heartbeat", &self.heartbeat)
			.field("debug", &self.debug)
			.field("connection_timeout", &self.connection_timeout)
			.field("subscription_timeout", &self.subscription_timeout)
			.field("publish_ack_timeout", &self.publish_ack_timeout)
			.field("enable_caching", &self.enable_caching)
			.finish_non_exhaustive()
	}
}
