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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use coordinator_common::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
	Forming,
	Active,
	Degraded,
	Maintenance,
	Disbanded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
	Joining,
	Active,
	Syncing,
	Degraded,
	Leaving,
	Banned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRole {
	Leader,
	CoLeader,
	Member,
	Observer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMethod {
	Equal,
	ContributionWeighted,
	WorkCreditWeighted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfiguration {
	pub reward_method: RewardMethod,
	pub min_uptime_percentage: f64,
	pub auto_kick_threshold: f64,
	pub leader_rotation: bool,
	pub rotation_interval_secs: u64,
	pub sync_tolerance_secs: u64,
	pub unanimous_required: bool,
}

impl Default for PoolConfiguration {
	fn default() -> Self {
		Self {
			reward_method: RewardMethod::ContributionWeighted,
			min_uptime_percentage: 95.0,
			auto_kick_threshold: 10.0,
			leader_rotation: false,
			rotation_interval_secs: 86_400,
			sync_tolerance_secs: 600,
			unanimous_required: false,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolMember {
	pub node_id: NodeId,
	pub role: PoolRole,
	pub status: MemberStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub joined_at: DateTime<Utc>,
	pub contribution_score: f64,
	pub credits_contributed: f64,
	pub rewards_earned: f64,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub last_sync: Option<DateTime<Utc>>,
}

impl PoolMember {
	pub fn new(node_id: NodeId, role: PoolRole) -> Self {
		Self {
			node_id,
			role,
			status: MemberStatus::Active,
			joined_at: Utc::now(),
			contribution_score: 0.0,
			credits_contributed: 0.0,
			rewards_earned: 0.0,
			last_sync: Some(Utc::now()),
		}
	}

	pub fn is_active(&self) -> bool {
		self.status == MemberStatus::Active
	}
}

/// A voluntary coalition of nodes pooling credits and rewards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodePool {
	pub pool_id: String,
	pub name: String,
	pub description: String,
	pub status: PoolStatus,
	pub creator_node_id: NodeId,
	pub configuration: PoolConfiguration,
	pub members: BTreeMap<NodeId, PoolMember>,
	pub total_work_credits: f64,
	pub rewards_distributed: f64,
	pub rewards_pending: f64,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub last_distribution: Option<DateTime<Utc>>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub last_rotation: Option<DateTime<Utc>>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

impl NodePool {
	pub fn active_members(&self) -> impl Iterator<Item = &PoolMember> {
		self.members.values().filter(|m| m.is_active())
	}

	pub fn leader(&self) -> Option<&PoolMember> {
		self.members.values().find(|m| m.role == PoolRole::Leader)
	}
}

/// Choose the next leader after `departing` leaves: any co-leader first,
/// otherwise the active member with the highest contribution score. `None`
/// means the pool has no viable leader and disbands.
pub fn elect_leader<'a>(pool: &'a NodePool, departing: &str) -> Option<&'a PoolMember> {
	pool.members
		.values()
		.find(|m| m.role == PoolRole::CoLeader && m.node_id != departing)
		.or_else(|| {
			pool.members
				.values()
				.filter(|m| m.node_id != departing && m.is_active())
				.max_by(|a, b| {
					a.contribution_score
						.partial_cmp(&b.contribution_score)
						.unwrap_or(std::cmp::Ordering::Equal)
						// deterministic on score ties
						.then_with(|| b.node_id.cmp(&a.node_id))
				})
		})
}

/// Round-robin rotation target: the next active member after the current
/// leader in node-id order, wrapping around. `None` when rotation has
/// nowhere to go.
pub fn next_rotation_leader(pool: &NodePool) -> Option<&PoolMember> {
	let leader = pool.leader()?;
	let mut actives: Vec<&PoolMember> =
		pool.members.values().filter(|m| m.is_active() || m.node_id == leader.node_id).collect();
	actives.sort_by(|a, b| a.node_id.cmp(&b.node_id));
	if actives.len() < 2 {
		return None;
	}
	let at = actives.iter().position(|m| m.node_id == leader.node_id)?;
	let next = actives[(at + 1) % actives.len()];
	if next.node_id == leader.node_id {
		None
	} else {
		Some(next)
	}
}

/// Split `amount` across active members by the pool's reward method. Zero
/// denominators fall back to an equal split.
pub fn member_rewards(pool: &NodePool, amount: f64) -> BTreeMap<NodeId, f64> {
	let active: Vec<&PoolMember> = pool.active_members().collect();
	let mut rewards = BTreeMap::new();
	if active.is_empty() || amount <= 0.0 {
		return rewards;
	}
	let equal_split = |rewards: &mut BTreeMap<NodeId, f64>| {
		let share = amount / active.len() as f64;
		for member in &active {
			rewards.insert(member.node_id.clone(), share);
		}
	};
	match pool.configuration.reward_method {
		RewardMethod::Equal => equal_split(&mut rewards),
		RewardMethod::ContributionWeighted => {
			let total: f64 = active.iter().map(|m| m.contribution_score).sum();
			if total > 0.0 {
				for member in &active {
					rewards.insert(member.node_id.clone(), amount * member.contribution_score / total);
				}
			} else {
				equal_split(&mut rewards);
			}
		}
		RewardMethod::WorkCreditWeighted => {
			let total: f64 = active.iter().map(|m| m.credits_contributed).sum();
			if total > 0.0 {
				for member in &active {
					rewards.insert(member.node_id.clone(), amount * member.credits_contributed / total);
				}
			} else {
				equal_split(&mut rewards);
			}
		}
	}
	rewards
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRequestStatus {
	Pending,
	Approved,
	Rejected,
	Expired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
	pub request_id: String,
	pub pool_id: String,
	pub node_id: NodeId,
	pub message: String,
	pub status: JoinRequestStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

/// Replication record for a pool-level mutation, applied by the sync loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSyncOperation {
	pub op_id: String,
	pub pool_id: String,
	pub op_type: String,
	#[serde(default)]
	pub data: Value,
	pub completed: bool,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pool_with(members: Vec<PoolMember>) -> NodePool {
		NodePool {
			pool_id: "p1".into(),
			name: "pool".into(),
			description: String::new(),
			status: PoolStatus::Active,
			creator_node_id: "creator".into(),
			configuration: PoolConfiguration::default(),
			members: members.into_iter().map(|m| (m.node_id.clone(), m)).collect(),
			total_work_credits: 0.0,
			rewards_distributed: 0.0,
			rewards_pending: 0.0,
			last_distribution: None,
			last_rotation: None,
			created_at: Utc::now(),
		}
	}

	fn member(id: &str, role: PoolRole, contribution: f64) -> PoolMember {
		PoolMember { contribution_score: contribution, ..PoolMember::new(id.into(), role) }
	}

	#[test]
	fn leader_failover_prefers_co_leader_then_contribution() {
		let pool = pool_with(vec![
			member("leader", PoolRole::Leader, 90.0),
			member("co", PoolRole::CoLeader, 20.0),
			member("m", PoolRole::Member, 70.0),
		]);
		assert_eq!(elect_leader(&pool, "leader").unwrap().node_id, "co");

		let pool = pool_with(vec![
			member("co", PoolRole::Leader, 20.0),
			member("m", PoolRole::Member, 70.0),
			member("m2", PoolRole::Member, 10.0),
		]);
		assert_eq!(elect_leader(&pool, "co").unwrap().node_id, "m");

		let pool = pool_with(vec![member("m", PoolRole::Leader, 70.0)]);
		assert!(elect_leader(&pool, "m").is_none());
	}

	#[test]
	fn rotation_walks_active_members_in_order() {
		let pool = pool_with(vec![
			member("b", PoolRole::Leader, 10.0),
			member("a", PoolRole::Member, 10.0),
			member("c", PoolRole::Member, 10.0),
		]);
		assert_eq!(next_rotation_leader(&pool).unwrap().node_id, "c");

		let wrapped = pool_with(vec![
			member("c", PoolRole::Leader, 10.0),
			member("a", PoolRole::Member, 10.0),
		]);
		assert_eq!(next_rotation_leader(&wrapped).unwrap().node_id, "a");

		let alone = pool_with(vec![member("a", PoolRole::Leader, 10.0)]);
		assert!(next_rotation_leader(&alone).is_none());
	}

	#[test]
	fn equal_rewards_split_evenly() {
		let mut pool = pool_with(vec![
			member("a", PoolRole::Leader, 0.0),
			member("b", PoolRole::Member, 0.0),
		]);
		pool.configuration.reward_method = RewardMethod::Equal;
		let rewards = member_rewards(&pool, 10.0);
		assert_eq!(rewards["a"], 5.0);
		assert_eq!(rewards["b"], 5.0);
	}

	#[test]
	fn contribution_weighted_rewards_follow_scores() {
		let pool = pool_with(vec![
			member("a", PoolRole::Leader, 75.0),
			member("b", PoolRole::Member, 25.0),
		]);
		let rewards = member_rewards(&pool, 8.0);
		assert!((rewards["a"] - 6.0).abs() < 1e-9);
		assert!((rewards["b"] - 2.0).abs() < 1e-9);
	}

	#[test]
	fn zero_denominator_falls_back_to_equal() {
		let mut pool = pool_with(vec![
			member("a", PoolRole::Leader, 0.0),
			member("b", PoolRole::Member, 0.0),
		]);
		pool.configuration.reward_method = RewardMethod::WorkCreditWeighted;
		let rewards = member_rewards(&pool, 4.0);
		assert_eq!(rewards["a"], 2.0);
		assert_eq!(rewards["b"], 2.0);
	}

	#[test]
	fn inactive_members_earn_nothing() {
		let mut banned = member("b", PoolRole::Member, 50.0);
		banned.status = MemberStatus::Banned;
		let pool = pool_with(vec![member("a", PoolRole::Leader, 50.0), banned]);
		let rewards = member_rewards(&pool, 6.0);
		assert_eq!(rewards.len(), 1);
		assert!((rewards["a"] - 6.0).abs() < 1e-9);
	}
}
