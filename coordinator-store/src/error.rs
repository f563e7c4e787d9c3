// Copyright 2019-2021 Parity Technologies (UK) Ltd.
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

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Store Adapter Error Enum
#[derive(Debug, Error)]
pub enum StoreError {
	/// The backend cannot currently be reached. Retryable; upper layers
	/// treat reads that fail this way as "no data yet".
	#[error("store unavailable: {0}")]
	Unavailable(sqlx::Error),

	#[error("sqlx error: {0}")]
	Sql(sqlx::Error),

	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),

	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	/// A unique secondary index rejected the write.
	#[error("duplicate document for {0}")]
	Duplicate(String),

	#[error("invalid field path: {0}")]
	InvalidField(String),

	/// The write queue is full or its flusher has shut down.
	#[error("write queue rejected the document")]
	QueueClosed,
}

impl StoreError {
	pub fn is_unavailable(&self) -> bool {
		matches!(self, StoreError::Unavailable(_))
	}

	pub fn is_duplicate(&self) -> bool {
		matches!(self, StoreError::Duplicate(_))
	}
}

impl From<sqlx::Error> for StoreError {
	fn from(e: sqlx::Error) -> Self {
		match &e {
			sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StoreError::Unavailable(e),
			sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
				StoreError::Duplicate(db.message().to_string())
			}
			_ => StoreError::Sql(e),
		}
	}
}
