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

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coordinator_common::NodeId;

/// Kinds of operational work a node can prove.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
	/// Bandwidth relayed for sessions, per GB.
	RelayBandwidth,
	/// Storage challenge passed.
	StorageProof,
	/// Validation signature produced.
	ValidationSig,
	/// Liveness beacon.
	UptimeBeacon,
}

impl TaskKind {
	/// Credit weight applied to the proof value.
	pub fn weight(self) -> f64 {
		match self {
			TaskKind::RelayBandwidth => 1.0,
			TaskKind::StorageProof => 0.5,
			TaskKind::ValidationSig => 0.3,
			TaskKind::UptimeBeacon => 0.1,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			TaskKind::RelayBandwidth => "relay_bandwidth",
			TaskKind::StorageProof => "storage_proof",
			TaskKind::ValidationSig => "validation_sig",
			TaskKind::UptimeBeacon => "uptime_beacon",
		}
	}
}

/// Proof of operational work performed by a node. Immutable once accepted;
/// unique per (node, slot, task kind).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkProof {
	pub node_id: NodeId,
	pub pool_id: Option<String>,
	pub slot: i64,
	pub task_type: TaskKind,
	pub value: f64,
	pub signature: String,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub timestamp: DateTime<Utc>,
}

impl WorkProof {
	/// Document key; also the uniqueness quantum.
	pub fn key(&self) -> String {
		format!("{}:{}:{}", self.node_id, self.slot, self.task_type.as_str())
	}

	pub fn credits(&self) -> f64 {
		self.value * self.task_type.weight()
	}
}

/// Aggregated work credits for an entity (node or pool) within one epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkTally {
	pub entity_id: String,
	pub epoch: i64,
	pub credits: f64,
	pub live_score: f64,
	pub rank: i64,
	pub last_selected_slot: Option<i64>,
}

impl WorkTally {
	pub fn key(&self) -> String {
		tally_key(&self.entity_id, self.epoch)
	}
}

pub fn tally_key(entity_id: &str, epoch: i64) -> String {
	format!("{}:{}", entity_id, epoch)
}

/// Order tallies and assign dense 1-based ranks. Ordering is credits
/// descending, then live score descending, then entity id ascending, so
/// repeated passes over the same inputs rank identically.
pub fn assign_ranks(tallies: &mut [WorkTally]) {
	tallies.sort_by(|a, b| {
		b.credits
			.partial_cmp(&a.credits)
			.unwrap_or(Ordering::Equal)
			.then(b.live_score.partial_cmp(&a.live_score).unwrap_or(Ordering::Equal))
			.then_with(|| a.entity_id.cmp(&b.entity_id))
	});
	for (i, tally) in tallies.iter_mut().enumerate() {
		tally.rank = i as i64 + 1;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tally(entity: &str, credits: f64, live: f64) -> WorkTally {
		WorkTally {
			entity_id: entity.into(),
			epoch: 0,
			credits,
			live_score: live,
			rank: 0,
			last_selected_slot: None,
		}
	}

	#[test]
	fn weights_match_the_credit_schedule() {
		assert_eq!(TaskKind::RelayBandwidth.weight(), 1.0);
		assert_eq!(TaskKind::StorageProof.weight(), 0.5);
		assert_eq!(TaskKind::ValidationSig.weight(), 0.3);
		assert_eq!(TaskKind::UptimeBeacon.weight(), 0.1);
	}

	#[test]
	fn ranking_two_nodes_by_weighted_credits() {
		// node A relays 2 GB; node B passes a storage challenge worth 3.0
		// and beacons once: A = 2.0, B = 3.0 * 0.5 + 1.0 * 0.1 = 1.6
		let mut tallies = vec![tally("node-b", 1.6, 1.0), tally("node-a", 2.0, 1.0)];
		assign_ranks(&mut tallies);
		assert_eq!(tallies[0].entity_id, "node-a");
		assert_eq!(tallies[0].rank, 1);
		assert_eq!(tallies[1].entity_id, "node-b");
		assert_eq!(tallies[1].rank, 2);
	}

	#[test]
	fn ranks_are_dense_and_deterministic() {
		let mut tallies = vec![
			tally("c", 5.0, 0.5),
			tally("a", 5.0, 0.5),
			tally("b", 5.0, 0.9),
			tally("d", 1.0, 1.0),
		];
		assign_ranks(&mut tallies);
		let order: Vec<&str> = tallies.iter().map(|t| t.entity_id.as_str()).collect();
		// equal credits: higher live score first, then id ascending
		assert_eq!(order, vec!["b", "a", "c", "d"]);
		let ranks: Vec<i64> = tallies.iter().map(|t| t.rank).collect();
		assert_eq!(ranks, vec![1, 2, 3, 4]);
	}

	#[test]
	fn ranks_form_a_gapless_prefix() {
		let mut tallies: Vec<WorkTally> =
			(0..50).map(|i| tally(&format!("n{:02}", i), (i % 7) as f64, 1.0)).collect();
		assign_ranks(&mut tallies);
		let mut ranks: Vec<i64> = tallies.iter().map(|t| t.rank).collect();
		ranks.sort_unstable();
		assert_eq!(ranks, (1..=50).collect::<Vec<i64>>());
	}

	#[test]
	fn proof_key_is_the_uniqueness_quantum() {
		let proof = WorkProof {
			node_id: "n1".into(),
			pool_id: None,
			slot: 100,
			task_type: TaskKind::RelayBandwidth,
			value: 2.0,
			signature: String::new(),
			timestamp: Utc::now(),
		};
		assert_eq!(proof.key(), "n1:100:relay_bandwidth");
		assert_eq!(proof.credits(), 2.0);
	}
}
