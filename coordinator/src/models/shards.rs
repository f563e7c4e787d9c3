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

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coordinator_common::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
	Creating,
	Assigned,
	Replicating,
	Ready,
	Degraded,
	Failed,
	Migrating,
	Archived,
}

impl ShardStatus {
	/// States in which the replication invariant must hold.
	pub fn requires_full_replication(self) -> bool {
		matches!(self, ShardStatus::Assigned | ShardStatus::Replicating | ShardStatus::Ready)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
	Available,
	Assigned,
	Busy,
	Degraded,
	Offline,
}

/// One chunk of session data placed on `replication_factor` hosts; the
/// first assigned host is the primary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shard {
	pub shard_id: String,
	pub session_id: String,
	pub chunk_index: u32,
	pub data_hash: String,
	pub size_bytes: u64,
	pub status: ShardStatus,
	pub assigned_hosts: Vec<NodeId>,
	pub encryption_key_hash: String,
	pub compression_ratio: f64,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub updated_at: DateTime<Utc>,
}

impl Shard {
	pub fn primary(&self) -> Option<&NodeId> {
		self.assigned_hosts.first()
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardHost {
	pub node_id: NodeId,
	pub onion_address: String,
	pub port: u16,
	pub status: HostStatus,
	pub capacity_bytes: u64,
	pub used_bytes: u64,
	pub bandwidth_mbps: f64,
	#[serde(default)]
	pub assigned_shards: BTreeSet<String>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub last_health_check: Option<DateTime<Utc>>,
	pub performance_score: f64,
}

impl ShardHost {
	pub fn available_bytes(&self) -> u64 {
		self.capacity_bytes.saturating_sub(self.used_bytes)
	}

	pub fn can_accept(&self, max_shards_per_host: usize) -> bool {
		self.status == HostStatus::Available && self.assigned_shards.len() < max_shards_per_host
	}
}

/// Pick `replication_factor` hosts for one shard from `candidates`, which
/// must already be filtered to acceptable hosts.
///
/// Candidates are ordered by performance score then free space; the first
/// becomes the primary. Replicas prefer overlay-address diversity: a
/// candidate is skipped while its first 8 address characters match an
/// already-selected host, until half the candidate set is selected. Any
/// remaining seats are filled without the diversity constraint.
pub fn select_hosts(candidates: &[&ShardHost], replication_factor: usize) -> Vec<NodeId> {
	let mut ordered: Vec<&ShardHost> = candidates.to_vec();
	ordered.sort_by(|a, b| {
		b.performance_score
			.partial_cmp(&a.performance_score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| b.available_bytes().cmp(&a.available_bytes()))
			.then_with(|| a.node_id.cmp(&b.node_id))
	});

	let mut selected: Vec<&ShardHost> = Vec::with_capacity(replication_factor);
	if let Some(&primary) = ordered.first() {
		selected.push(primary);
	}
	for &host in ordered.iter().skip(1) {
		if selected.len() >= replication_factor {
			break;
		}
		let relaxed = selected.len() >= ordered.len() / 2;
		let clashes = selected
			.iter()
			.any(|s| s.onion_address.get(..8) == host.onion_address.get(..8));
		if relaxed || !clashes {
			selected.push(host);
		}
	}
	// not enough diverse hosts; fill from the remainder in order
	if selected.len() < replication_factor {
		for &host in &ordered {
			if selected.len() >= replication_factor {
				break;
			}
			if !selected.iter().any(|s| s.node_id == host.node_id) {
				selected.push(host);
			}
		}
	}
	selected.into_iter().map(|h| h.node_id.clone()).collect()
}

/// A single move proposed by the rebalancer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
	pub shard_id: String,
	pub from: NodeId,
	pub to: NodeId,
}

/// Plan migrations from hosts carrying more than `1.5×` the average shard
/// count to hosts under `0.5×`, never moving a shard's primary replica and
/// at most `max_moves` per cycle.
pub fn plan_rebalance(hosts: &[ShardHost], shards: &[Shard], max_moves: usize) -> Vec<Migration> {
	if hosts.is_empty() || max_moves == 0 {
		return Vec::new();
	}
	let total: usize = hosts.iter().map(|h| h.assigned_shards.len()).sum();
	let avg = total as f64 / hosts.len() as f64;
	if avg <= 0.0 {
		return Vec::new();
	}
	let overloaded: Vec<&ShardHost> =
		hosts.iter().filter(|h| (h.assigned_shards.len() as f64) > avg * 1.5).collect();
	let mut underloaded: Vec<&ShardHost> = hosts
		.iter()
		.filter(|h| h.status == HostStatus::Available && (h.assigned_shards.len() as f64) < avg * 0.5)
		.collect();
	if overloaded.is_empty() || underloaded.is_empty() {
		return Vec::new();
	}
	underloaded.sort_by_key(|h| h.assigned_shards.len());

	let mut moves = Vec::new();
	let mut target_idx = 0;
	for host in overloaded {
		for shard_id in &host.assigned_shards {
			if moves.len() >= max_moves {
				return moves;
			}
			let shard = match shards.iter().find(|s| &s.shard_id == shard_id) {
				Some(s) => s,
				None => continue,
			};
			// primaries stay put
			if shard.primary().map(String::as_str) == Some(host.node_id.as_str()) {
				continue;
			}
			// don't create a second replica on the same host
			let target = underloaded
				.iter()
				.skip(target_idx % underloaded.len())
				.chain(underloaded.iter())
				.find(|t| !shard.assigned_hosts.contains(&t.node_id));
			if let Some(target) = target {
				moves.push(Migration {
					shard_id: shard_id.clone(),
					from: host.node_id.clone(),
					to: target.node_id.clone(),
				});
				target_idx += 1;
			}
		}
	}
	moves
}

/// Health metrics reported by a host's overlay endpoint.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct HostMetricsReport {
	#[serde(default)]
	pub response_time_ms: f64,
	#[serde(default)]
	pub uptime_percentage: f64,
	#[serde(default)]
	pub throughput_mbps: f64,
	#[serde(default)]
	pub error_rate: f64,
	#[serde(default)]
	pub cpu_percent: f64,
	#[serde(default)]
	pub memory_percent: f64,
	#[serde(default)]
	pub network_latency_ms: f64,
}

impl HostMetricsReport {
	/// Any bound exceeded marks the host degraded.
	pub fn is_degraded(&self) -> bool {
		self.response_time_ms > 5_000.0
			|| self.uptime_percentage < 95.0
			|| self.error_rate > 0.05
			|| self.cpu_percent > 90.0
			|| self.memory_percent > 90.0
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerformanceSample {
	pub sample_id: String,
	pub node_id: NodeId,
	#[serde(flatten)]
	pub metrics: HostMetricsReport,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
	Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardCreationTask {
	pub task_id: String,
	pub session_id: String,
	pub shard_ids: Vec<String>,
	pub status: OperationStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub completed_at: Option<DateTime<Utc>>,
	pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceKind {
	Scheduled,
	Emergency,
	Upgrade,
	Repair,
	Migration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaintenanceWindow {
	pub window_id: String,
	pub node_id: NodeId,
	pub maintenance_type: MaintenanceKind,
	pub status: OperationStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub starts_at: DateTime<Utc>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub ends_at: DateTime<Utc>,
	#[serde(default)]
	pub affected_shards: Vec<String>,
	#[serde(default)]
	pub backup_hosts: Vec<NodeId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrityCheck {
	pub check_id: String,
	pub shard_id: String,
	pub host_id: NodeId,
	pub expected_hash: String,
	pub actual_hash: Option<String>,
	pub passed: bool,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub checked_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepairOperation {
	pub repair_id: String,
	pub shard_id: String,
	pub failed_host: NodeId,
	pub replacement_host: Option<NodeId>,
	#[serde(default)]
	pub source_hosts: Vec<NodeId>,
	pub status: OperationStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub completed_at: Option<DateTime<Utc>>,
	pub error: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn host(id: &str, addr: &str, score: f64) -> ShardHost {
		ShardHost {
			node_id: id.into(),
			onion_address: addr.into(),
			port: 5050,
			status: HostStatus::Available,
			capacity_bytes: 1 << 40,
			used_bytes: 0,
			bandwidth_mbps: 100.0,
			assigned_shards: BTreeSet::new(),
			last_health_check: None,
			performance_score: score,
		}
	}

	#[test]
	fn placement_prefers_address_diversity() {
		let hosts = vec![
			host("h1", "aaxxxxxx111.onion", 0.9),
			host("h2", "aaxxxxxx222.onion", 0.8),
			host("h3", "abxxxxxx333.onion", 0.7),
			host("h4", "baxxxxxx444.onion", 0.6),
			host("h5", "caxxxxxx555.onion", 0.5),
		];
		let refs: Vec<&ShardHost> = hosts.iter().collect();
		let selected = select_hosts(&refs, 3);
		// primary is the best-scoring `aa` host; the second `aa` host is
		// skipped for prefix-diverse alternatives
		assert_eq!(selected, vec!["h1", "h3", "h4"]);
	}

	#[test]
	fn placement_fills_when_diversity_runs_out() {
		let hosts = vec![
			host("h1", "aaxxxxxx111.onion", 0.9),
			host("h2", "aaxxxxxx222.onion", 0.8),
			host("h3", "aaxxxxxx333.onion", 0.7),
		];
		let refs: Vec<&ShardHost> = hosts.iter().collect();
		let selected = select_hosts(&refs, 3);
		assert_eq!(selected.len(), 3);
		assert_eq!(selected[0], "h1");
	}

	#[test]
	fn primary_is_best_scoring_candidate() {
		let hosts = vec![host("low", "aa.onion", 0.2), host("high", "bb.onion", 0.9)];
		let refs: Vec<&ShardHost> = hosts.iter().collect();
		assert_eq!(select_hosts(&refs, 2)[0], "high");
	}

	#[test]
	fn rebalance_moves_from_hot_to_cold_excluding_primaries() {
		let mut hot = host("hot", "aa.onion", 0.9);
		let cold = host("cold", "bb.onion", 0.9);
		let mid = host("mid", "cc.onion", 0.9);
		let mut shards = Vec::new();
		for i in 0..6 {
			let id = format!("s{}", i);
			hot.assigned_shards.insert(id.clone());
			shards.push(Shard {
				shard_id: id,
				session_id: "sess".into(),
				chunk_index: i,
				data_hash: String::new(),
				size_bytes: 1,
				status: ShardStatus::Ready,
				// `hot` is primary for even shards only
				assigned_hosts: if i % 2 == 0 {
					vec!["hot".into(), "mid".into()]
				} else {
					vec!["mid".into(), "hot".into()]
				},
				encryption_key_hash: String::new(),
				compression_ratio: 1.0,
				created_at: Utc::now(),
				updated_at: Utc::now(),
			});
		}
		let mut mid = mid;
		for i in 0..2 {
			mid.assigned_shards.insert(format!("s{}", i));
		}
		let hosts = vec![hot, cold, mid];
		let moves = plan_rebalance(&hosts, &shards, 2);
		assert!(!moves.is_empty());
		assert!(moves.len() <= 2);
		for m in &moves {
			assert_eq!(m.from, "hot");
			assert_eq!(m.to, "cold");
			let shard = shards.iter().find(|s| s.shard_id == m.shard_id).unwrap();
			assert_ne!(shard.primary().unwrap(), "hot");
		}
	}

	#[test]
	fn balanced_hosts_produce_no_moves() {
		let mut a = host("a", "aa.onion", 0.9);
		let mut b = host("b", "bb.onion", 0.9);
		a.assigned_shards.insert("s1".into());
		b.assigned_shards.insert("s2".into());
		assert!(plan_rebalance(&[a, b], &[], 4).is_empty());
	}

	#[test]
	fn metric_bounds_mark_degraded() {
		let healthy = HostMetricsReport {
			response_time_ms: 120.0,
			uptime_percentage: 99.9,
			error_rate: 0.001,
			cpu_percent: 35.0,
			memory_percent: 50.0,
			..Default::default()
		};
		assert!(!healthy.is_degraded());
		assert!(HostMetricsReport { cpu_percent: 95.0, uptime_percentage: 99.0, ..healthy }.is_degraded());
		assert!(HostMetricsReport { response_time_ms: 6_000.0, ..healthy }.is_degraded());
		assert!(HostMetricsReport { uptime_percentage: 90.0, ..healthy }.is_degraded());
	}
}
