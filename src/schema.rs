//! Typed façade over the raw string-payload wire protocol.
//!
//! Binds a map of `schemaKey -> validator` and merges a user-facing
//! `(schemaKey, subTopic)` pair into a single wire topic with the reserved
//! `_` separator.

use crate::{
	client::PubSubClient,
	error::Error,
	message::MessageContext,
	options::SubscribeOptions,
	topic::TopicBuf,
};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// A schema's validation function. Receives the decoded JSON payload and
/// returns an error message on mismatch.
pub type SchemaValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Handler invoked with a decoded, schema-validated payload.
pub type TypedMessageHandler = Arc<dyn Fn(&Value, &MessageContext) + Send + Sync>;

const WIRE_SEPARATOR: char = '_';

/// A thin wrapper binding `{schemaKey -> payload-schema}` over a
/// [`PubSubClient`].
pub struct TypedFacade {
	client: PubSubClient,
	schemas: HashMap<String, SchemaValidator>,
}

impl TypedFacade {
	/// Builds a façade over `client` with the given schema map. Rejects any
	/// `schemaKey` containing the reserved `_` separator, since that would
	/// make the merged wire topic ambiguous to split back apart.
	pub fn new(client: PubSubClient, schemas: HashMap<String, SchemaValidator>) -> Result<Self, Error> {
		for key in schemas.keys() {
			if key.contains(WIRE_SEPARATOR) {
				return Err(Error::InvalidArg(format!(
					"schema key {key:?} must not contain '{WIRE_SEPARATOR}'"
				)));
			}
		}
		Ok(Self { client, schemas })
	}

	fn wire_topic(schema_key: &str, sub_topic: &str) -> Result<TopicBuf, Error> {
		if schema_key.is_empty() || sub_topic.is_empty() {
			return Err(Error::InvalidArg("schema key and sub-topic must be non-empty".into()));
		}
		TopicBuf::new(format!("{schema_key}{WIRE_SEPARATOR}{sub_topic}"))
	}

	fn schema_for(&self, schema_key: &str) -> Result<&SchemaValidator, Error> {
		self.schemas
			.get(schema_key)
			.ok_or_else(|| Error::SchemaMissing(schema_key.to_owned()))
	}

	/// Validates `payload` against `schema_key`'s schema, JSON-encodes it,
	/// and publishes it fire-and-forget to the merged wire topic.
	pub fn publish(&self, schema_key: &str, sub_topic: &str, payload: &Value) -> Result<String, Error> {
		let validator = self.schema_for(schema_key)?;
		validator(payload).map_err(|reason| Error::SchemaMismatch(schema_key.to_owned(), reason))?;

		let topic = Self::wire_topic(schema_key, sub_topic)?;
		let encoded = serde_json::to_string(payload).map_err(|error| Error::InvalidArg(error.to_string()))?;
		self.client.publish(topic.as_str(), encoded)
	}

	/// Subscribes to the merged wire topic; inbound payload strings are
	/// JSON-decoded, validated against `schema_key`'s schema, and handed to
	/// `handler` as a structurally-typed [`serde_json::Value`].
	pub async fn subscribe(
		&self,
		schema_key: &'static str,
		sub_topic: &str,
		handler: TypedMessageHandler,
		timeout: Option<Duration>,
	) -> Result<crate::ack::AckOutcome<()>, Error> {
		// Confirm the schema exists before ever reaching the wire.
		self.schema_for(schema_key)?;
		let topic = Self::wire_topic(schema_key, sub_topic)?;
		let schemas = self.schemas.clone();

		let raw_handler: crate::handler::MessageHandler = Arc::new(move |payload: &str, context: &MessageContext| {
			let Ok(value) = serde_json::from_str::<Value>(payload) else {
				tracing::warn!(topic = %context.topic, "typed façade: payload is not valid json");
				return;
			};
			let Some(validator) = schemas.get(schema_key) else {
				tracing::warn!(%schema_key, "typed façade: schema disappeared after subscribe");
				return;
			};
			if let Err(reason) = validator(&value) {
				tracing::warn!(%schema_key, %reason, "typed façade: payload failed schema validation");
				return;
			}
			handler(&value, context);
		});

		self.client
			.subscribe(topic.as_str(), raw_handler, SubscribeOptions::default(), timeout)
			.await
	}
}
