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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use coordinator_common::{util, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
	Primary,
	Secondary,
	Backup,
	Witness,
	Coordinator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	InSync,
	Syncing,
	OutOfSync,
	Conflict,
	Offline,
	Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	StateUpdate,
	Transaction,
	Configuration,
	Maintenance,
	Emergency,
	Checkpoint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
	StateDivergence,
	OperationConflict,
	TimestampConflict,
	VersionConflict,
	LeadershipConflict,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operator {
	pub operator_id: String,
	pub node_id: NodeId,
	pub role: OperatorRole,
	pub endpoint: String,
	pub public_key: String,
	pub sync_status: SyncStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub last_heartbeat: DateTime<Utc>,
	#[serde(default)]
	pub capabilities: Vec<String>,
	pub state_version: u64,
}

impl Operator {
	pub fn is_offline(&self, now: DateTime<Utc>, timeout_secs: u64) -> bool {
		now.signed_duration_since(self.last_heartbeat).num_seconds() > timeout_secs as i64
	}
}

/// Deterministic leader election: among operators that are reachable and
/// carry an electable role, the lexicographically smallest operator id wins.
/// No voting; every operator reaches the same answer from the same registry.
pub fn elect_leader(operators: &[Operator]) -> Option<&Operator> {
	operators
		.iter()
		.filter(|op| {
			matches!(op.sync_status, SyncStatus::InSync | SyncStatus::Syncing)
				&& matches!(op.role, OperatorRole::Primary | OperatorRole::Secondary)
		})
		.min_by(|a, b| a.operator_id.cmp(&b.operator_id))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Pending,
	Executing,
	Completed,
	Failed,
}

/// A replicated unit of work broadcast between operators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncOperation {
	pub op_id: String,
	pub initiator: String,
	pub operation_type: OperationKind,
	#[serde(default)]
	pub payload: Value,
	#[serde(default)]
	pub target_operators: Vec<String>,
	/// 1 (lowest) to 5; 4 and above execute immediately on submit.
	pub priority: u8,
	pub status: OperationStatus,
	pub retry_count: u32,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub executed_at: Option<DateTime<Utc>>,
	pub error: Option<String>,
}

/// Hashed snapshot of operator state used for rollback and deterministic
/// cross-operator comparison.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateCheckpoint {
	pub checkpoint_id: String,
	pub operator_id: String,
	pub state_hash: String,
	pub state_data: Value,
	pub version: u64,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

impl StateCheckpoint {
	/// SHA-256 over the canonical (key-sorted) JSON serialization.
	pub fn hash_state(state: &Value) -> String {
		util::canonical_json_hash(state)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
	Open,
	Resolved,
	Escalated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConflict {
	pub conflict_id: String,
	pub conflict_type: ConflictKind,
	#[serde(default)]
	pub involved_operators: Vec<String>,
	#[serde(default)]
	pub data: Value,
	pub status: ConflictStatus,
	pub resolution: Option<String>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub resolved_at: Option<DateTime<Utc>>,
}

/// Rolling per-operator execution statistics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorMetrics {
	pub operator_id: String,
	pub total_operations: u64,
	pub successful_operations: u64,
	pub failed_operations: u64,
	pub avg_response_ms: f64,
	pub success_rate: f64,
	pub uptime_percentage: f64,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub updated_at: DateTime<Utc>,
}

impl OperatorMetrics {
	pub fn new(operator_id: String) -> Self {
		Self {
			operator_id,
			total_operations: 0,
			successful_operations: 0,
			failed_operations: 0,
			avg_response_ms: 0.0,
			success_rate: 1.0,
			uptime_percentage: 100.0,
			updated_at: Utc::now(),
		}
	}

	pub fn record(&mut self, response_ms: f64, success: bool) {
		self.total_operations += 1;
		if success {
			self.successful_operations += 1;
		} else {
			self.failed_operations += 1;
		}
		// exponential moving average over response times
		self.avg_response_ms = if self.total_operations == 1 {
			response_ms
		} else {
			self.avg_response_ms * 0.9 + response_ms * 0.1
		};
		self.success_rate = self.successful_operations as f64 / self.total_operations as f64;
		self.updated_at = Utc::now();
	}
}

/// Keys a state-update payload may never carry; they are bookkeeping owned
/// by the sync engine itself.
pub const RESERVED_STATE_KEYS: &[&str] = &["state_version", "checkpoint_id", "operator_id"];

pub fn validate_state_update(payload: &Value) -> bool {
	match payload.as_object() {
		Some(map) if !map.is_empty() => {
			!map.keys().any(|k| RESERVED_STATE_KEYS.contains(&k.as_str()))
		}
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn operator(id: &str, role: OperatorRole, status: SyncStatus) -> Operator {
		Operator {
			operator_id: id.into(),
			node_id: format!("node-{}", id),
			role,
			endpoint: String::new(),
			public_key: String::new(),
			sync_status: status,
			last_heartbeat: Utc::now(),
			capabilities: Vec::new(),
			state_version: 0,
		}
	}

	#[test]
	fn election_is_deterministic_and_smallest_id_wins() {
		let ops = vec![
			operator("op-c", OperatorRole::Secondary, SyncStatus::InSync),
			operator("op-a", OperatorRole::Secondary, SyncStatus::Syncing),
			operator("op-b", OperatorRole::Primary, SyncStatus::InSync),
		];
		for _ in 0..5 {
			assert_eq!(elect_leader(&ops).unwrap().operator_id, "op-a");
		}
	}

	#[test]
	fn election_skips_offline_and_ineligible_roles() {
		let ops = vec![
			operator("op-a", OperatorRole::Witness, SyncStatus::InSync),
			operator("op-b", OperatorRole::Secondary, SyncStatus::Offline),
			operator("op-c", OperatorRole::Secondary, SyncStatus::InSync),
		];
		assert_eq!(elect_leader(&ops).unwrap().operator_id, "op-c");
		assert!(elect_leader(&ops[..2]).is_none());
	}

	#[test]
	fn checkpoint_hash_is_order_independent() {
		let a = json!({ "pools": 3, "peers": ["x", "y"] });
		let b = json!({ "peers": ["x", "y"], "pools": 3 });
		assert_eq!(StateCheckpoint::hash_state(&a), StateCheckpoint::hash_state(&b));
		assert_ne!(
			StateCheckpoint::hash_state(&a),
			StateCheckpoint::hash_state(&json!({ "pools": 4, "peers": ["x", "y"] }))
		);
	}

	#[test]
	fn state_updates_reject_reserved_keys() {
		assert!(validate_state_update(&json!({ "peers_total": 10 })));
		assert!(!validate_state_update(&json!({})));
		assert!(!validate_state_update(&json!({ "state_version": 9 })));
		assert!(!validate_state_update(&json!(42)));
	}

	#[test]
	fn metrics_track_success_rate() {
		let mut metrics = OperatorMetrics::new("op-a".into());
		metrics.record(100.0, true);
		metrics.record(200.0, false);
		assert_eq!(metrics.total_operations, 2);
		assert_eq!(metrics.success_rate, 0.5);
		assert!(metrics.avg_response_ms > 100.0);
	}

	#[test]
	fn heartbeat_timeout_marks_offline() {
		let mut op = operator("op-a", OperatorRole::Primary, SyncStatus::InSync);
		let now = Utc::now();
		op.last_heartbeat = now - chrono::Duration::seconds(301);
		assert!(op.is_offline(now, 300));
		op.last_heartbeat = now - chrono::Duration::seconds(200);
		assert!(!op.is_offline(now, 300));
	}
}
