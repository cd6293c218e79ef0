use crate::error::Error;
use core::borrow;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{hash::Hash, ops};

/// A topic name.
///
/// Unlike MQTT, topics here carry no wildcard grammar: a topic is simply a
/// non-empty string, created implicitly on first subscribe or publish. See
/// [`TopicBuf`] for the owned variant.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Topic(str);

/// An owned topic name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicBuf(String);

impl Topic {
	/// Creates a new `Topic`, rejecting the empty string.
	pub fn new<S: AsRef<str> + ?Sized>(topic: &S) -> Result<&Topic, Error> {
		let topic = topic.as_ref();
		if topic.is_empty() {
			return Err(Error::InvalidArg("topic cannot be empty".into()));
		}
		Ok(unsafe { &*(topic as *const str as *const Topic) })
	}

	#[inline]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	#[inline]
	pub fn to_topic_buf(&self) -> TopicBuf {
		TopicBuf::from(self)
	}

	fn from_str(s: &str) -> &Self {
		unsafe { &*(s as *const str as *const Topic) }
	}
}

impl TopicBuf {
	/// Creates a new `TopicBuf`, rejecting the empty string.
	pub fn new(topic: impl Into<String>) -> Result<Self, Error> {
		let topic = topic.into();
		Topic::new(&topic)?;
		Ok(Self(topic))
	}

	#[inline]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl AsRef<str> for Topic {
	#[inline]
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}

impl AsRef<Topic> for Topic {
	#[inline]
	fn as_ref(&self) -> &Topic {
		self
	}
}

impl ToOwned for Topic {
	type Owned = TopicBuf;
	#[inline]
	fn to_owned(&self) -> Self::Owned {
		self.to_topic_buf()
	}
}

impl ops::Deref for TopicBuf {
	type Target = Topic;
	#[inline]
	fn deref(&self) -> &Self::Target {
		Topic::from_str(&self.0)
	}
}

impl borrow::Borrow<Topic> for TopicBuf {
	#[inline]
	fn borrow(&self) -> &Topic {
		use ops::Deref;
		self.deref()
	}
}

impl From<&Topic> for TopicBuf {
	#[inline]
	fn from(value: &Topic) -> Self {
		Self(String::from(&value.0))
	}
}

impl AsRef<Topic> for TopicBuf {
	#[inline]
	fn as_ref(&self) -> &Topic {
		Topic::from_str(&self.0)
	}
}

impl core::fmt::Display for TopicBuf {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<&str> for TopicBuf {
	type Error = Error;
	#[inline]
	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl TryFrom<String> for TopicBuf {
	type Error = Error;
	#[inline]
	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

/// Serializes as a bare JSON string, matching the wire's `topic` fields.
impl Serialize for TopicBuf {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

/// Deserializes from a JSON string, rejecting the empty topic the same way
/// [`TopicBuf::new`] does.
impl<'de> Deserialize<'de> for TopicBuf {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		TopicBuf::new(raw).map_err(de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serializes_as_bare_string() {
		let topic = TopicBuf::new("T1").unwrap();
		assert_eq!(serde_json::to_string(&topic).unwrap(), "\"T1\"");
	}

	#[test]
	fn round_trips_through_json() {
		let topic = TopicBuf::new("rooms/lobby").unwrap();
		let encoded = serde_json::to_string(&topic).unwrap();
		let decoded: TopicBuf = serde_json::from_str(&encoded).unwrap();
		assert_eq!(topic, decoded);
	}

	#[test]
	fn empty_string_fails_to_deserialize() {
		let result: Result<TopicBuf, _> = serde_json::from_str("\"\"");
		assert!(result.is_err());
	}
}
