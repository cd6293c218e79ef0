//! `clientMsgId` generation: the client-chosen id used to correlate acks.
//!
//! Prefers a cryptographically random UUID; falls back to
//! `msg_{timestamp_ms}_{random_base36}` only when UUID generation is
//! statically disabled via the `no-uuid-ids` feature. The `uuid` crate's v4
//! generator cannot practically fail, so the fallback exists purely to keep
//! that code path testable rather than dead.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates a new client-chosen correlation id.
#[cfg(not(feature = "no-uuid-ids"))]
pub fn client_msg_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

#[cfg(feature = "no-uuid-ids")]
pub fn client_msg_id() -> String {
	client_msg_id_fallback(epoch_millis())
}

/// `msg_{timestamp_ms}_{random_base36}` fallback format.
pub fn client_msg_id_fallback(timestamp_ms: u128) -> String {
	let mut rng = rand::thread_rng();
	let suffix: String = (0..8)
		.map(|_| BASE36_ALPHABET[rng.gen_range(0..BASE36_ALPHABET.len())] as char)
		.collect();
	format!("msg_{timestamp_ms}_{suffix}")
}

#[allow(dead_code)]
fn epoch_millis() -> u128 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_ids_are_unique() {
		let a = client_msg_id();
		let b = client_msg_id();
		assert_ne!(a, b);
	}

	#[test]
	fn fallback_format_has_expected_shape() {
		let id = client_msg_id_fallback(1_700_000_000_000);
		assert!(id.starts_with("msg_1700000000000_"));
		assert_eq!(id.len(), "msg_1700000000000_".len() + 8);
	}
}
