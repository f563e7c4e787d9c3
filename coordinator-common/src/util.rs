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

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A fresh random identifier.
pub fn fresh_id() -> String {
	Uuid::new_v4().to_string()
}

/// SHA-256 over the canonical JSON serialization of `value`, hex-encoded.
///
/// `serde_json` keeps object members in a sorted map, so two structurally
/// equal values always serialize to the same bytes. This is the hash used
/// for state checkpoints and must stay deterministic across operators.
pub fn canonical_json_hash(value: &Value) -> String {
	let bytes = serde_json::to_vec(value).expect("JSON values always serialize");
	hex_digest(&bytes)
}

/// Hex-encoded SHA-256 of raw bytes.
pub fn hex_digest(bytes: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(bytes);
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn canonical_hash_ignores_member_order() {
		let a = json!({ "b": 2, "a": 1, "nested": { "y": [1, 2], "x": true } });
		let b = json!({ "nested": { "x": true, "y": [1, 2] }, "a": 1, "b": 2 });
		assert_eq!(canonical_json_hash(&a), canonical_json_hash(&b));
	}

	#[test]
	fn canonical_hash_sees_value_changes() {
		let a = json!({ "a": 1 });
		let b = json!({ "a": 2 });
		assert_ne!(canonical_json_hash(&a), canonical_json_hash(&b));
	}

	#[test]
	fn fresh_ids_are_unique() {
		assert_ne!(fresh_id(), fresh_id());
	}
}
