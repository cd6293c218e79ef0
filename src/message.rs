use crate::topic::TopicBuf;
use serde::{Deserialize, Serialize};

/// A published message, either outbound (about to be queued) or inbound
/// (received from the gateway).
///
/// When a message is enqueued by the client, `id`, `sender_id`, and `seq`
/// are placeholder sentinels — the server assigns the real values and
/// echoes them back in the `publish` envelope and the publish ack.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageBody {
	pub id: String,
	pub topic: TopicBuf,
	#[serde(rename = "senderId")]
	pub sender_id: String,
	pub seq: String,
	#[serde(rename = "sentAt")]
	pub sent_at: i64,
	pub payload: String,
	#[serde(rename = "clientMsgId")]
	pub client_msg_id: String,
	#[serde(rename = "clientPublishTs")]
	pub client_publish_ts: i64,
}

impl MessageBody {
	/// Sentinel used for fields the server has not yet assigned.
	pub const PENDING_SENTINEL: &'static str = "";
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn topic_field_serializes_as_plain_string() {
		let body = MessageBody {
			id: "m1".into(),
			topic: TopicBuf::new("T1").unwrap(),
			sender_id: "client-a".into(),
			seq: "00001".into(),
			sent_at: 1000,
			payload: "hello".into(),
			client_msg_id: "c1".into(),
			client_publish_ts: 999,
		};
		let encoded = serde_json::to_value(&body).unwrap();
		assert_eq!(encoded["topic"], serde_json::json!("T1"));

		let decoded: MessageBody = serde_json::from_value(encoded).unwrap();
		assert_eq!(decoded.topic, body.topic);
	}
}

/// Metadata handed to a message handler alongside the decoded payload.
#[derive(Clone, Debug)]
pub struct MessageContext {
	pub topic: TopicBuf,
	pub seq: String,
	pub sent_at: i64,
}
