//! Crate-wide error taxonomy.
//!
//! Every public operation either returns a typed result or fails with one
//! of the variants below; the crate never surfaces a raw `reqwest` or
//! `tungstenite` error to a caller.

use thiserror::Error;

/// The error kinds a caller of the public API can observe.
#[derive(Clone, Debug, Error)]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArg(String),

	#[error("operation requires joinChannel to be called first")]
	NotJoined,

	#[error("authorization failed (status {status}): {body}")]
	Auth { status: u16, body: String },

	#[error("operation timed out")]
	Timeout,

	#[error("send queue is full")]
	Backpressure,

	#[error("operation was cancelled")]
	Cancelled,

	#[error("could not decode inbound frame: {0}")]
	Decode(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("no schema registered for key {0:?}")]
	SchemaMissing(String),

	#[error("payload does not match the schema for {0:?}: {1}")]
	SchemaMismatch(String, String),

	#[error("connection task has shut down")]
	ClientTaskClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
	fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
		Self::ClientTaskClosed
	}
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
	fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
		Self::ClientTaskClosed
	}
}

impl From<tokio::time::error::Elapsed> for Error {
	fn from(_: tokio::time::error::Elapsed) -> Self {
		Self::Timeout
	}
}
