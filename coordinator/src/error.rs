// Copyright 2017-2021 Parity Technologies (UK) Ltd.
// This file is part of overlay-coordinator.

// overlay-coordinator is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// overlay-coordinator is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with overlay-coordinator.  If not, see <http://www.gnu.org/licenses/>.

use std::io;

use serde::Serialize;
use thiserror::Error;

use coordinator_store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coordinator Error Enum
#[derive(Debug, Error)]
pub enum Error {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	// store error
	#[error("store: {0}")]
	Store(#[from] StoreError),

	// overlay transport error
	#[error("overlay transport: {0}")]
	Overlay(#[from] reqwest::Error),

	/// The caller's input is shape-wrong, bounds-wrong, stale or duplicate.
	#[error("validation: {0}")]
	Validation(String),

	/// The entity exists but is in the wrong state, or the caller lacks a
	/// permission or has exhausted a quota.
	#[error("precondition: {0}")]
	Precondition(String),

	/// A per-key rate limit rejected the request; retry after the window.
	#[error("rate limited: {0}")]
	RateLimited(String),

	/// Checksum or signature mismatch, or a fraud score over threshold.
	#[error("integrity: {0}")]
	Integrity(String),

	/// External value-network adapter failure.
	#[error("value network: {0}")]
	ValueNetwork(String),

	#[error("configuration: {0}")]
	Config(String),

	// actor and channel error
	#[error("Trying to send to disconnected actor")]
	Disconnected,
	#[error("Sending on a disconnected channel")]
	Channel,

	#[error("{0}")]
	Shutdown(String),
}

/// Error taxonomy surfaced to callers; the outer HTTP layer maps these onto
/// status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	Validation,
	Precondition,
	Transient,
	Integrity,
	Fatal,
}

impl Error {
	pub fn validation(msg: impl Into<String>) -> Self {
		Error::Validation(msg.into())
	}

	pub fn precondition(msg: impl Into<String>) -> Self {
		Error::Precondition(msg.into())
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Validation(_) => ErrorKind::Validation,
			Error::Precondition(_) => ErrorKind::Precondition,
			Error::RateLimited(_) | Error::Overlay(_) | Error::ValueNetwork(_) | Error::Channel
			| Error::Disconnected => ErrorKind::Transient,
			Error::Store(e) if e.is_unavailable() => ErrorKind::Transient,
			Error::Store(e) if e.is_duplicate() => ErrorKind::Validation,
			Error::Integrity(_) => ErrorKind::Integrity,
			_ => ErrorKind::Fatal,
		}
	}

	pub fn retryable(&self) -> bool {
		self.kind() == ErrorKind::Transient
	}

	/// The `{kind, message, retryable}` payload public operations hand to
	/// the control surface.
	pub fn response(&self) -> ErrorResponse {
		ErrorResponse { kind: self.kind(), message: self.to_string(), retryable: self.retryable() }
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
	pub kind: ErrorKind,
	pub message: String,
	pub retryable: bool,
}

impl From<xtra::Disconnected> for Error {
	fn from(_: xtra::Disconnected) -> Self {
		Error::Disconnected
	}
}

impl<T> From<flume::SendError<T>> for Error {
	fn from(_: flume::SendError<T>) -> Self {
		Error::Channel
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn taxonomy_maps_to_retryability() {
		assert!(Error::RateLimited("3/hour".into()).retryable());
		assert!(!Error::Validation("bad port".into()).retryable());
		assert!(!Error::Integrity("hash mismatch".into()).retryable());
		assert_eq!(Error::Precondition("not leader".into()).kind(), ErrorKind::Precondition);
	}

	#[test]
	fn response_carries_kind_and_message() {
		let resp = Error::Validation("onion address required".into()).response();
		assert_eq!(resp.kind, ErrorKind::Validation);
		assert!(!resp.retryable);
		assert!(resp.message.contains("onion address"));
	}
}
