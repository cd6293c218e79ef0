use crate::error::Error;
use core::fmt;

/// A channel name.
///
/// A client instance is bound to exactly one [`Channel`] between
/// [`joinChannel`](crate::PubSubClient::join_channel) and
/// [`close`](crate::PubSubClient::close). Internally this is just a
/// `String`; the type exists to reject the empty channel at the boundary
/// instead of deep inside the connection task.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Channel(String);

impl Channel {
	/// Creates a new `Channel`, rejecting the empty string.
	pub fn new(name: impl Into<String>) -> Result<Self, Error> {
		let name = name.into();
		if name.is_empty() {
			return Err(Error::InvalidArg("channel name cannot be empty".into()));
		}
		Ok(Self(name))
	}

	#[inline]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for Channel {
	#[inline]
	fn as_ref(&self) -> &str {
		&self.0
	}
}
