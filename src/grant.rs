//! Grant provider: obtains and caches short-lived channel grant tokens.
//!
//! Acquires a channel-scoped token by calling `POST {authBase}/api/erebus/pubsub/grant`
//! with `{channel}`, optionally caching it process-wide.

use crate::{channel::Channel, error::Error};
use async_trait::async_trait;
use std::{
	sync::{Mutex, OnceLock},
	time::{Duration, Instant},
};

/// Default grant lifetime.
pub const GRANT_TTL: Duration = Duration::from_secs(15 * 60);

/// Supplies the credential the client presents when requesting a grant.
#[async_trait]
pub trait TokenProvider: Send + Sync {
	/// Returns the bearer value to send with the grant request, e.g. an API key.
	async fn token(&self) -> Result<String, Error>;
}

/// A static API key, for hosts that don't need to refresh credentials.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
	async fn token(&self) -> Result<String, Error> {
		Ok(self.0.clone())
	}
}

/// A cached grant and the instant it was issued.
#[derive(Clone, Debug)]
pub struct CachedGrant {
	pub token: String,
	pub issued_at: Instant,
}

impl CachedGrant {
	pub fn is_expired(&self, ttl: Duration) -> bool {
		self.issued_at.elapsed() >= ttl
	}
}

/// Process-wide cache for channel grants.
///
/// A browser-hosted client would keep this in its key-value store under a
/// well-known key; this crate has no browser, so the default implementation
/// below is a single-process `Mutex`-guarded slot under one well-known key
/// instead.
#[async_trait]
pub trait GrantCache: Send + Sync {
	async fn read(&self, channel: &Channel) -> Option<CachedGrant>;
	async fn write(&self, channel: &Channel, grant: CachedGrant);
}

/// The default, in-process grant cache singleton.
#[derive(Default)]
pub struct ProcessGrantCache;

static CACHE_SLOT: OnceLock<Mutex<Option<(String, CachedGrant)>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<(String, CachedGrant)>> {
	CACHE_SLOT.get_or_init(|| Mutex::new(None))
}

#[async_trait]
impl GrantCache for ProcessGrantCache {
	async fn read(&self, channel: &Channel) -> Option<CachedGrant> {
		let guard = slot().lock().expect("grant cache lock poisoned");
		match &*guard {
			Some((cached_channel, grant)) if cached_channel == channel.as_str() => Some(grant.clone()),
			_ => None,
		}
	}

	async fn write(&self, channel: &Channel, grant: CachedGrant) {
		let mut guard = slot().lock().expect("grant cache lock poisoned");
		*guard = Some((channel.as_str().to_owned(), grant));
	}
}

#[derive(serde::Serialize)]
struct GrantRequest<'a> {
	channel: &'a str,
}

#[derive(serde::Deserialize)]
struct GrantResponse {
	grant_jwt: String,
}

#[derive(serde::Deserialize)]
struct GrantErrorBody {
	#[serde(default)]
	error: String,
	#[serde(default)]
	message: String,
}

/// Requests (or returns a cached) grant token for `channel`.
#[tracing::instrument(skip(http, token_provider, cache), fields(channel = %channel))]
pub async fn obtain_grant(
	http: &reqwest::Client,
	auth_base_url: &str,
	channel: &Channel,
	token_provider: &dyn TokenProvider,
	cache: Option<&dyn GrantCache>,
	enable_caching: bool,
) -> Result<String, Error> {
	if enable_caching {
		if let Some(cache) = cache {
			if let Some(cached) = cache.read(channel).await {
				if !cached.is_expired(GRANT_TTL) {
					tracing::debug!("using cached grant");
					return Ok(cached.token);
				}
			}
		}
	}

	let bearer = token_provider.token().await?;
	let url = format!("{}/api/erebus/pubsub/grant", auth_base_url.trim_end_matches('/'));

	let response = http
		.post(&url)
		.bearer_auth(bearer)
		.json(&GrantRequest {
			channel: channel.as_str(),
		})
		.send()
		.await
		.map_err(|error| Error::Transport(error.to_string()))?;

	let status = response.status();
	if !status.is_success() {
		let body = response.text().await.unwrap_or_default();
		let message = serde_json::from_str::<GrantErrorBody>(&body)
			.map(|b| if b.message.is_empty() { b.error } else { b.message })
			.unwrap_or(body);
		return Err(Error::Auth {
			status: status.as_u16(),
			body: message,
		});
	}

	let body: GrantResponse = response
		.json()
		.await
		.map_err(|error| Error::Decode(error.to_string()))?;

	if enable_caching {
		if let Some(cache) = cache {
			cache
				.write(
					channel,
					CachedGrant {
						token: body.grant_jwt.clone(),
						issued_at: Instant::now(),
					},
				)
				.await;
		}
	}

	Ok(body.grant_jwt)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn process_cache_round_trips() {
		let cache = ProcessGrantCache;
		let channel = Channel::new("room-grant-test").unwrap();
		cache
			.write(
				&channel,
				CachedGrant {
					token: "tok".into(),
					issued_at: Instant::now(),
				},
			)
			.await;
		let read = cache.read(&channel).await.unwrap();
		assert_eq!(read.token, "tok");
	}

	#[test]
	fn cached_grant_expires_after_ttl() {
		let grant = CachedGrant {
			token: "tok".into(),
			issued_at: Instant::now() - Duration::from_secs(16 * 60),
		};
		assert!(grant.is_expired(GRANT_TTL));
	}
}
