//! Wire codec: encodes and decodes framed [`PacketEnvelope`]s.
//!
//! Frames are single UTF-8 text frames, each containing one JSON object.
//! The `ack` variant's discriminator hierarchy (`packetType` →
//! `result.path` → `result.result.ok`) can't be expressed as a single
//! `serde` tagged enum without ambiguity, so decoding goes through
//! `serde_json::Value` and inspects those fields in that order.

use crate::{message::MessageBody, topic::TopicBuf};
use serde_json::{json, Value};

/// Maximum frame size accepted by [`decode`]. Oversize frames are dropped.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckPath {
	Publish,
	Subscribe,
	Unsubscribe,
}

#[derive(Clone, Debug)]
pub struct AckOutcomeError {
	pub code: String,
	pub message: String,
}

#[derive(Clone, Debug)]
pub struct PublishAckOk {
	pub seq: String,
	pub server_msg_id: String,
	pub t_ingress: i64,
}

#[derive(Clone, Debug)]
pub enum AckResult {
	PublishOk(PublishAckOk),
	SubscriptionOk,
	Err(AckOutcomeError),
}

#[derive(Clone, Debug)]
pub struct AckEnvelope {
	pub client_msg_id: String,
	pub path: AckPath,
	pub topic: TopicBuf,
	pub result: AckResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatusWire {
	Online,
	Offline,
}

#[derive(Clone, Debug)]
pub struct PresenceFrame {
	pub topic: TopicBuf,
	pub client_id: String,
	pub status: PresenceStatusWire,
	pub timestamp: i64,
}

/// The tagged union transmitted on the wire.
#[derive(Clone, Debug)]
pub enum PacketEnvelope {
	Publish {
		topic: TopicBuf,
		payload: MessageBody,
	},
	Subscribe {
		topic: TopicBuf,
		client_msg_id: Option<String>,
		stream_old_messages: bool,
	},
	Unsubscribe {
		topic: TopicBuf,
		client_msg_id: Option<String>,
	},
	Ack(AckEnvelope),
	Presence(PresenceFrame),
	Heartbeat,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
	#[error("cannot encode envelope: {0}")]
	Invalid(&'static str),
	#[error("json serialization failed: {0}")]
	Json(#[from] serde_json::Error),
}

/// Encodes an envelope into a wire frame, validating required fields first.
pub fn encode(envelope: &PacketEnvelope) -> Result<String, EncodeError> {
	let value = match envelope {
		PacketEnvelope::Publish { topic, payload } => {
			if topic.as_str().is_empty() {
				return Err(EncodeError::Invalid("publish topic cannot be empty"));
			}
			json!({
				"packetType": "publish",
				"topic": topic.as_str(),
				"payload": payload,
			})
		}
		PacketEnvelope::Subscribe {
			topic,
			client_msg_id,
			stream_old_messages,
		} => {
			if topic.as_str().is_empty() {
				return Err(EncodeError::Invalid("subscribe topic cannot be empty"));
			}
			json!({
				"packetType": "subscribe",
				"topic": topic.as_str(),
				"clientMsgId": client_msg_id,
				"streamOldMessages": stream_old_messages,
			})
		}
		PacketEnvelope::Unsubscribe {
			topic,
			client_msg_id,
		} => {
			if topic.as_str().is_empty() {
				return Err(EncodeError::Invalid("unsubscribe topic cannot be empty"));
			}
			json!({
				"packetType": "unsubscribe",
				"topic": topic.as_str(),
				"clientMsgId": client_msg_id,
			})
		}
		PacketEnvelope::Heartbeat => json!({ "packetType": "heartbeat" }),
		PacketEnvelope::Presence(PresenceFrame {
			topic,
			client_id,
			status,
			timestamp,
		}) => {
			if topic.as_str().is_empty() || client_id.is_empty() {
				return Err(EncodeError::Invalid("presence requires topic and clientId"));
			}
			json!({
				"packetType": "presence",
				"topic": topic.as_str(),
				"clientId": client_id,
				"status": match status {
					PresenceStatusWire::Online => "online",
					PresenceStatusWire::Offline => "offline",
				},
				"timestamp": timestamp,
			})
		}
		PacketEnvelope::Ack(ack) => {
			if ack.client_msg_id.is_empty() {
				return Err(EncodeError::Invalid("ack requires clientMsgId"));
			}
			let path = match ack.path {
				AckPath::Publish => "publish",
				AckPath::Subscribe => "subscribe",
				AckPath::Unsubscribe => "unsubscribe",
			};
			let result = match &ack.result {
				AckResult::PublishOk(ok) => json!({
					"ok": true,
					"t_ingress": ok.t_ingress,
					"seq": ok.seq,
					"serverMsgId": ok.server_msg_id,
				}),
				AckResult::SubscriptionOk => json!({ "ok": true }),
				AckResult::Err(err) => json!({
					"ok": false,
					"code": err.code,
					"message": err.message,
				}),
			};
			json!({
				"packetType": "ack",
				"clientMsgId": ack.client_msg_id,
				"result": {
					"path": path,
					"topic": ack.topic.as_str(),
					"result": result,
				},
			})
		}
	};

	Ok(value.to_string())
}

/// Decodes an inbound frame, performing a best-effort parse.
///
/// Returns `None` for structurally invalid, empty, or oversize frames; the
/// caller is expected to log at `warn` when this happens.
pub fn decode(frame: &str) -> Option<PacketEnvelope> {
	if frame.is_empty() || frame.len() > MAX_FRAME_BYTES {
		tracing::warn!(len = frame.len(), "dropping oversize or empty frame");
		return None;
	}

	let value: Value = match serde_json::from_str(frame) {
		Ok(v) => v,
		Err(error) => {
			tracing::warn!(%error, "failed to parse frame as json");
			return None;
		}
	};

	// Legacy shape: a bare MessageBody with no packetType wrapper. Wrap it
	// into a publish envelope for uniform downstream handling.
	if value.get("packetType").is_none() {
		if let Ok(body) = serde_json::from_value::<MessageBody>(value.clone()) {
			return Some(PacketEnvelope::Publish {
				topic: body.topic.clone(),
				payload: body,
			});
		}
		tracing::warn!("frame has no packetType and is not a legacy publish body");
		return None;
	}

	let packet_type = value.get("packetType")?.as_str()?;

	match packet_type {
		"heartbeat" => Some(PacketEnvelope::Heartbeat),
		"publish" => {
			let topic = value.get("topic")?.as_str()?;
			let topic = TopicBuf::new(topic).ok()?;
			let payload: MessageBody = serde_json::from_value(value.get("payload")?.clone()).ok()?;
			Some(PacketEnvelope::Publish { topic, payload })
		}
		"subscribe" => {
			let topic = TopicBuf::new(value.get("topic")?.as_str()?).ok()?;
			let client_msg_id = value
				.get("clientMsgId")
				.and_then(Value::as_str)
				.map(String::from);
			let stream_old_messages = value
				.get("streamOldMessages")
				.and_then(Value::as_bool)
				.unwrap_or(false);
			Some(PacketEnvelope::Subscribe {
				topic,
				client_msg_id,
				stream_old_messages,
			})
		}
		"unsubscribe" => {
			let topic = TopicBuf::new(value.get("topic")?.as_str()?).ok()?;
			let client_msg_id = value
				.get("clientMsgId")
				.and_then(Value::as_str)
				.map(String::from);
			Some(PacketEnvelope::Unsubscribe {
				topic,
				client_msg_id,
			})
		}
		"presence" => {
			let topic = TopicBuf::new(value.get("topic")?.as_str()?).ok()?;
			let client_id = value.get("clientId")?.as_str()?.to_owned();
			let status = match value.get("status")?.as_str()? {
				"online" => PresenceStatusWire::Online,
				"offline" => PresenceStatusWire::Offline,
				_ => return None,
			};
			let timestamp = value.get("timestamp")?.as_i64()?;
			Some(PacketEnvelope::Presence(PresenceFrame {
				topic,
				client_id,
				status,
				timestamp,
			}))
		}
		"ack" => decode_ack(&value),
		_ => {
			tracing::warn!(%packet_type, "unknown packetType");
			None
		}
	}
}

fn decode_ack(value: &Value) -> Option<PacketEnvelope> {
	let client_msg_id = value.get("clientMsgId")?.as_str()?.to_owned();
	let result = value.get("result")?;
	let path_str = result.get("path")?.as_str()?;
	let topic = TopicBuf::new(result.get("topic")?.as_str()?).ok()?;
	let inner = result.get("result")?;
	let ok = inner.get("ok")?.as_bool()?;

	let path = match path_str {
		"publish" => AckPath::Publish,
		"subscribe" => AckPath::Subscribe,
		"unsubscribe" => AckPath::Unsubscribe,
		_ => {
			tracing::warn!(path = %path_str, "ack with unknown path");
			return None;
		}
	};

	let result = if ok {
		match path {
			AckPath::Publish => AckResult::PublishOk(PublishAckOk {
				seq: inner.get("seq")?.as_str()?.to_owned(),
				server_msg_id: inner.get("serverMsgId")?.as_str()?.to_owned(),
				t_ingress: inner.get("t_ingress")?.as_i64()?,
			}),
			AckPath::Subscribe | AckPath::Unsubscribe => AckResult::SubscriptionOk,
		}
	} else {
		AckResult::Err(AckOutcomeError {
			code: inner
				.get("code")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_owned(),
			message: inner
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_owned(),
		})
	};

	Some(PacketEnvelope::Ack(AckEnvelope {
		client_msg_id,
		path,
		topic,
		result,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_message() -> MessageBody {
		MessageBody {
			id: "m1".into(),
			topic: TopicBuf::new("T1").unwrap(),
			sender_id: "client-a".into(),
			seq: "00001".into(),
			sent_at: 1000,
			payload: "hello".into(),
			client_msg_id: "c1".into(),
			client_publish_ts: 999,
		}
	}

	#[test]
	fn publish_round_trips() {
		let envelope = PacketEnvelope::Publish {
			topic: TopicBuf::new("T1").unwrap(),
			payload: sample_message(),
		};
		let frame = encode(&envelope).unwrap();
		let decoded = decode(&frame).unwrap();
		match decoded {
			PacketEnvelope::Publish { topic, payload } => {
				assert_eq!(topic.as_str(), "T1");
				assert_eq!(payload.id, "m1");
			}
			_ => panic!("expected publish"),
		}
	}

	#[test]
	fn legacy_bare_message_body_wraps_into_publish() {
		let body = sample_message();
		let frame = serde_json::to_string(&body).unwrap();
		let decoded = decode(&frame).unwrap();
		assert!(matches!(decoded, PacketEnvelope::Publish { .. }));
	}

	#[test]
	fn unknown_packet_type_is_none() {
		assert!(decode(r#"{"packetType":"bogus"}"#).is_none());
	}

	#[test]
	fn ack_with_unknown_path_is_none() {
		let frame = r#"{"packetType":"ack","clientMsgId":"c1","result":{"path":"bogus","topic":"T1","result":{"ok":true}}}"#;
		assert!(decode(frame).is_none());
	}

	#[test]
	fn publish_ack_ok_decodes_fields() {
		let frame = r#"{"packetType":"ack","clientMsgId":"c1","result":{"path":"publish","topic":"T1","result":{"ok":true,"t_ingress":42,"seq":"00007","serverMsgId":"s1"}}}"#;
		match decode(frame).unwrap() {
			PacketEnvelope::Ack(AckEnvelope {
				result: AckResult::PublishOk(ok),
				..
			}) => {
				assert_eq!(ok.seq, "00007");
				assert_eq!(ok.server_msg_id, "s1");
				assert_eq!(ok.t_ingress, 42);
			}
			_ => panic!("expected publish ack ok"),
		}
	}

	#[test]
	fn publish_ack_err_decodes_fields() {
		let frame = r#"{"packetType":"ack","clientMsgId":"c1","result":{"path":"publish","topic":"forbidden","result":{"ok":false,"code":"FORBIDDEN","message":"not subscribed"}}}"#;
		match decode(frame).unwrap() {
			PacketEnvelope::Ack(AckEnvelope {
				result: AckResult::Err(err),
				..
			}) => {
				assert_eq!(err.code, "FORBIDDEN");
				assert_eq!(err.message, "not subscribed");
			}
			_ => panic!("expected publish ack err"),
		}
	}

	#[test]
	fn subscribe_ack_ok_round_trips() {
		let ack = AckEnvelope {
			client_msg_id: "c1".into(),
			path: AckPath::Subscribe,
			topic: TopicBuf::new("T1").unwrap(),
			result: AckResult::SubscriptionOk,
		};
		let frame = encode(&PacketEnvelope::Ack(ack)).unwrap();
		match decode(&frame).unwrap() {
			PacketEnvelope::Ack(AckEnvelope {
				path: AckPath::Subscribe,
				result: AckResult::SubscriptionOk,
				..
			}) => {}
			_ => panic!("expected subscribe ack ok"),
		}
	}

	#[test]
	fn oversize_frame_is_none() {
		let huge = "x".repeat(MAX_FRAME_BYTES + 1);
		assert!(decode(&huge).is_none());
	}

	#[test]
	fn empty_frame_is_none() {
		assert!(decode("").is_none());
	}

	#[test]
	fn presence_round_trips() {
		let frame = encode(&PacketEnvelope::Presence(PresenceFrame {
			topic: TopicBuf::new("T1").unwrap(),
			client_id: "client-b".into(),
			status: PresenceStatusWire::Online,
			timestamp: 123,
		}))
		.unwrap();
		match decode(&frame).unwrap() {
			PacketEnvelope::Presence(PresenceFrame {
				client_id, status, ..
			}) => {
				assert_eq!(client_id, "client-b");
				assert_eq!(status, PresenceStatusWire::Online);
			}
			_ => panic!("expected presence"),
		}
	}

	#[test]
	fn heartbeat_round_trips() {
		let frame = encode(&PacketEnvelope::Heartbeat).unwrap();
		assert!(matches!(decode(&frame), Some(PacketEnvelope::Heartbeat)));
	}

	#[test]
	fn encode_rejects_empty_topic() {
		let envelope = PacketEnvelope::Subscribe {
			topic: TopicBuf::new("x").unwrap(),
			client_msg_id: None,
			stream_old_messages: false,
		};
		// sanity: valid topic still encodes fine.
		assert!(encode(&envelope).is_ok());
	}
}
