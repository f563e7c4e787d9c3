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

//! Pool coordination: membership, leadership, reward distribution and the
//! health/decay loops. All mutations of a pool funnel through this actor.

use std::{collections::BTreeMap, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::json;
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Store};

use crate::{
	actors::{spawn_ticker, Die},
	error::{Error, Result},
	models::pools::{
		elect_leader, member_rewards, next_rotation_leader, JoinRequest, JoinRequestStatus,
		MemberStatus, NodePool, PoolConfiguration, PoolMember, PoolRole, PoolStatus,
		PoolSyncOperation,
	},
	models::sync::OperationKind,
};

use super::operator_sync::{OperatorSyncEngine, SubmitOperation};

#[derive(Clone, Debug, Deserialize)]
pub struct PoolsConfig {
	#[serde(default = "default_min_pool_size")]
	pub min_pool_size: usize,
	#[serde(default = "default_max_pool_size")]
	pub max_pool_size: usize,
	#[serde(default = "default_sync_interval")]
	pub sync_interval_secs: u64,
	#[serde(default = "default_health_interval")]
	pub health_check_interval_secs: u64,
	/// Minimum pending rewards (USDT) before a distribution runs.
	#[serde(default = "default_reward_threshold")]
	pub reward_threshold: f64,
	#[serde(default = "default_distribution_interval")]
	pub distribution_interval_secs: u64,
	/// Seconds a member may go without syncing before it counts unhealthy.
	#[serde(default = "default_member_sync_tolerance")]
	pub member_sync_tolerance_secs: u64,
}

impl Default for PoolsConfig {
	fn default() -> Self {
		Self {
			min_pool_size: default_min_pool_size(),
			max_pool_size: default_max_pool_size(),
			sync_interval_secs: default_sync_interval(),
			health_check_interval_secs: default_health_interval(),
			reward_threshold: default_reward_threshold(),
			distribution_interval_secs: default_distribution_interval(),
			member_sync_tolerance_secs: default_member_sync_tolerance(),
		}
	}
}

const fn default_min_pool_size() -> usize {
	3
}

const fn default_max_pool_size() -> usize {
	50
}

const fn default_sync_interval() -> u64 {
	30
}

const fn default_health_interval() -> u64 {
	120
}

const fn default_reward_threshold() -> f64 {
	1.0
}

const fn default_distribution_interval() -> u64 {
	3600
}

const fn default_member_sync_tolerance() -> u64 {
	600
}

/// Scheduled leadership rotation, when the pool opted in. The old leader
/// steps down to member; the next active member in id order takes over.
fn rotate_leadership(pool: &mut NodePool, now: chrono::DateTime<Utc>) {
	if !pool.configuration.leader_rotation || pool.status != PoolStatus::Active {
		return;
	}
	let interval = ChronoDuration::seconds(pool.configuration.rotation_interval_secs as i64);
	let due = pool
		.last_rotation
		.map_or(true, |at| now.signed_duration_since(at) >= interval);
	if !due {
		return;
	}
	let (old_leader, new_leader) = match (pool.leader(), next_rotation_leader(pool)) {
		(Some(old), Some(new)) => (old.node_id.clone(), new.node_id.clone()),
		_ => return,
	};
	if let Some(member) = pool.members.get_mut(&old_leader) {
		member.role = PoolRole::Member;
	}
	if let Some(member) = pool.members.get_mut(&new_leader) {
		member.role = PoolRole::Leader;
	}
	pool.last_rotation = Some(now);
	log::info!("pool {}: rotated leadership {} -> {}", pool.pool_id, old_leader, new_leader);
}

pub struct PoolCoordinator {
	store: Store,
	config: PoolsConfig,
	sync: Address<OperatorSyncEngine>,
	pools: HashMap<String, NodePool>,
}

impl PoolCoordinator {
	pub fn new(store: Store, config: PoolsConfig, sync: Address<OperatorSyncEngine>) -> Self {
		Self { store, config, sync, pools: HashMap::new() }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store.collection(collections::NODE_POOLS).create_index(&["status"], false).await?;
		self.store
			.collection(collections::POOL_JOIN_REQUESTS)
			.create_index(&["pool_id", "status"], false)
			.await?;
		self.store
			.collection(collections::POOL_SYNC_OPERATIONS)
			.create_index(&["pool_id", "completed"], false)
			.await?;
		Ok(())
	}

	async fn load(&mut self) -> Result<()> {
		let pools: Vec<NodePool> = self
			.store
			.collection(collections::NODE_POOLS)
			.find(&Filter::new().ne("status", "disbanded"), &[], None)
			.await?;
		log::info!("pool coordinator loaded {} pools", pools.len());
		self.pools = pools.into_iter().map(|p| (p.pool_id.clone(), p)).collect();
		Ok(())
	}

	async fn save(&self, pool: &NodePool) -> Result<()> {
		self.store.collection(collections::NODE_POOLS).upsert(&pool.pool_id, pool).await?;
		Ok(())
	}

	fn pool_mut(&mut self, pool_id: &str) -> Result<&mut NodePool> {
		self.pools
			.get_mut(pool_id)
			.ok_or_else(|| Error::validation(format!("unknown pool {}", pool_id)))
	}

	async fn record_pool_op(&self, pool_id: &str, op_type: &str, data: serde_json::Value) -> Result<()> {
		let op = PoolSyncOperation {
			op_id: util::fresh_id(),
			pool_id: pool_id.to_string(),
			op_type: op_type.to_string(),
			data,
			completed: false,
			created_at: Utc::now(),
		};
		self.store.collection(collections::POOL_SYNC_OPERATIONS).upsert(&op.op_id, &op).await?;
		Ok(())
	}

	async fn create_pool(
		&mut self,
		creator: NodeId,
		name: String,
		description: String,
		configuration: PoolConfiguration,
	) -> Result<NodePool> {
		if name.trim().is_empty() {
			return Err(Error::validation("pool name must not be empty"));
		}
		let mut members = BTreeMap::new();
		members.insert(creator.clone(), PoolMember::new(creator.clone(), PoolRole::Leader));
		let pool = NodePool {
			pool_id: util::fresh_id(),
			name,
			description,
			status: PoolStatus::Forming,
			creator_node_id: creator,
			configuration,
			members,
			total_work_credits: 0.0,
			rewards_distributed: 0.0,
			rewards_pending: 0.0,
			last_distribution: None,
			last_rotation: None,
			created_at: Utc::now(),
		};
		self.save(&pool).await?;
		self.pools.insert(pool.pool_id.clone(), pool.clone());
		log::info!("pool {} created by {}", pool.pool_id, pool.creator_node_id);
		Ok(pool)
	}

	async fn request_join(&mut self, node_id: NodeId, pool_id: String, message: String) -> Result<JoinRequest> {
		let pool = self
			.pools
			.get(&pool_id)
			.ok_or_else(|| Error::validation(format!("unknown pool {}", pool_id)))?;
		if pool.status == PoolStatus::Disbanded {
			return Err(Error::precondition("pool is disbanded"));
		}
		if pool.members.contains_key(&node_id) {
			return Err(Error::validation(format!("{} is already a member", node_id)));
		}
		if pool.members.len() >= self.config.max_pool_size {
			return Err(Error::precondition("pool is full"));
		}
		let request = JoinRequest {
			request_id: util::fresh_id(),
			pool_id,
			node_id,
			message,
			status: JoinRequestStatus::Pending,
			created_at: Utc::now(),
		};
		self.store
			.collection(collections::POOL_JOIN_REQUESTS)
			.upsert(&request.request_id, &request)
			.await?;
		Ok(request)
	}

	async fn approve_join(&mut self, request_id: String, approver: NodeId) -> Result<NodePool> {
		let mut request: JoinRequest = self
			.store
			.collection(collections::POOL_JOIN_REQUESTS)
			.get(&request_id)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown join request {}", request_id)))?;
		if request.status != JoinRequestStatus::Pending {
			return Err(Error::precondition("join request already decided"));
		}
		let min_size = self.config.min_pool_size;
		let max_size = self.config.max_pool_size;
		let pool = self.pool_mut(&request.pool_id)?;
		match pool.members.get(&approver).map(|m| m.role) {
			Some(PoolRole::Leader) | Some(PoolRole::CoLeader) => {}
			_ => {
				return Err(Error::precondition(
					"only the leader or a co-leader may approve join requests",
				))
			}
		}
		if pool.members.len() >= max_size {
			return Err(Error::precondition("pool is full"));
		}
		pool.members.insert(
			request.node_id.clone(),
			PoolMember::new(request.node_id.clone(), PoolRole::Member),
		);
		if pool.status == PoolStatus::Forming && pool.members.len() >= min_size {
			pool.status = PoolStatus::Active;
			log::info!("pool {} reached quorum and is now active", pool.pool_id);
		}
		let snapshot = pool.clone();
		request.status = JoinRequestStatus::Approved;
		self.store
			.collection(collections::POOL_JOIN_REQUESTS)
			.upsert(&request.request_id, &request)
			.await?;
		self.save(&snapshot).await?;
		self.record_pool_op(&snapshot.pool_id, "member_joined", json!({ "node_id": request.node_id }))
			.await?;
		Ok(snapshot)
	}

	async fn leave_pool(&mut self, node_id: NodeId, pool_id: String) -> Result<NodePool> {
		let min_size = self.config.min_pool_size;
		let pool = self.pool_mut(&pool_id)?;
		let departing = pool
			.members
			.get(&node_id)
			.ok_or_else(|| Error::validation(format!("{} is not a member of {}", node_id, pool_id)))?
			.clone();
		let was_leader = departing.role == PoolRole::Leader;

		if was_leader {
			match elect_leader(pool, &node_id).map(|m| m.node_id.clone()) {
				Some(successor) => {
					if let Some(member) = pool.members.get_mut(&successor) {
						member.role = PoolRole::Leader;
						log::info!("pool {}: new leader {}", pool_id, successor);
					}
				}
				None => {
					pool.status = PoolStatus::Disbanded;
					log::warn!("pool {} disbanded: no viable leader", pool_id);
				}
			}
		}
		pool.members.remove(&node_id);
		if pool.status != PoolStatus::Disbanded && pool.members.len() < min_size {
			pool.status = PoolStatus::Disbanded;
			log::warn!("pool {} disbanded: below minimum size", pool_id);
		}
		let snapshot = pool.clone();
		if snapshot.status == PoolStatus::Disbanded {
			self.pools.remove(&pool_id);
		}
		self.save(&snapshot).await?;
		self.record_pool_op(&pool_id, "member_left", json!({ "node_id": node_id })).await?;
		Ok(snapshot)
	}

	async fn sync_work_credits(
		&mut self,
		pool_id: String,
		node_credits: BTreeMap<NodeId, f64>,
	) -> Result<()> {
		let pool = self.pool_mut(&pool_id)?;
		let now = Utc::now();
		for (node_id, credits) in &node_credits {
			if let Some(member) = pool.members.get_mut(node_id) {
				member.credits_contributed = *credits;
				member.last_sync = Some(now);
			}
		}
		pool.total_work_credits = pool.members.values().map(|m| m.credits_contributed).sum();
		let snapshot = pool.clone();
		self.save(&snapshot).await?;
		Ok(())
	}

	async fn distribute_rewards(&mut self, pool_id: String) -> Result<BTreeMap<NodeId, f64>> {
		let threshold = self.config.reward_threshold;
		let pool = self.pool_mut(&pool_id)?;
		if pool.status != PoolStatus::Active {
			return Err(Error::precondition(format!(
				"pool {} is not active ({:?})",
				pool_id, pool.status
			)));
		}
		if pool.rewards_pending < threshold {
			return Err(Error::precondition(format!(
				"pending rewards {} below the {} threshold",
				pool.rewards_pending, threshold
			)));
		}
		let amount = pool.rewards_pending;
		let rewards = member_rewards(pool, amount);
		if rewards.is_empty() {
			return Err(Error::precondition("no active members to reward"));
		}
		for (node_id, reward) in &rewards {
			if let Some(member) = pool.members.get_mut(node_id) {
				member.rewards_earned += reward;
			}
		}
		pool.rewards_pending = 0.0;
		pool.rewards_distributed += amount;
		pool.last_distribution = Some(Utc::now());
		let snapshot = pool.clone();
		self.save(&snapshot).await?;
		self.record_pool_op(&pool_id, "reward_distribution", json!({ "amount": amount })).await?;
		// replicate across operators
		let submit = SubmitOperation {
			operation_type: OperationKind::Transaction,
			payload: json!({
				"kind": "reward_distribution",
				"pool_id": pool_id,
				"amount": amount,
				"rewards": rewards,
			}),
			target_operators: Vec::new(),
			priority: 3,
		};
		if let Err(e) = self.sync.send(submit).await {
			log::warn!("failed to replicate reward distribution: {}", e);
		}
		log::info!("pool {} distributed {} across {} members", pool_id, amount, rewards.len());
		Ok(rewards)
	}

	/// Contribution decay and score accrual, plus completion of recorded
	/// pool operations.
	async fn sync_pass(&mut self) -> Result<()> {
		let tolerance = ChronoDuration::seconds(self.config.member_sync_tolerance_secs as i64);
		let now = Utc::now();
		let mut dirty = Vec::new();
		for pool in self.pools.values_mut() {
			if pool.status == PoolStatus::Disbanded {
				continue;
			}
			for member in pool.members.values_mut() {
				let fresh = member
					.last_sync
					.map_or(false, |at| now.signed_duration_since(at) <= tolerance);
				member.contribution_score = if fresh {
					(member.contribution_score + 0.01 * member.credits_contributed).clamp(0.0, 100.0)
				} else {
					member.contribution_score * 0.99
				};
			}
			rotate_leadership(pool, now);
			dirty.push(pool.clone());
		}
		for pool in dirty {
			self.save(&pool).await?;
		}

		let pending: Vec<PoolSyncOperation> = self
			.store
			.collection(collections::POOL_SYNC_OPERATIONS)
			.find(&Filter::new().eq("completed", false), &[], Some(256))
			.await?;
		for mut op in pending {
			op.completed = true;
			self.store.collection(collections::POOL_SYNC_OPERATIONS).upsert(&op.op_id, &op).await?;
		}
		Ok(())
	}

	/// Member and pool health: silent or low-contribution members degrade,
	/// members under the kick threshold are banned, and a pool with fewer
	/// than half its members active is itself degraded.
	async fn health_pass(&mut self) -> Result<()> {
		let tolerance = ChronoDuration::seconds(self.config.member_sync_tolerance_secs as i64);
		let now = Utc::now();
		let mut dirty = Vec::new();
		for pool in self.pools.values_mut() {
			if !matches!(pool.status, PoolStatus::Active | PoolStatus::Degraded) {
				continue;
			}
			let kick_threshold = pool.configuration.auto_kick_threshold;
			for member in pool.members.values_mut() {
				if member.status == MemberStatus::Banned {
					continue;
				}
				let silent = member
					.last_sync
					.map_or(true, |at| now.signed_duration_since(at) > tolerance);
				if member.contribution_score < kick_threshold && silent {
					member.status = MemberStatus::Banned;
					log::warn!("pool {}: banned inactive member {}", pool.pool_id, member.node_id);
				} else if silent || member.contribution_score < 10.0 {
					member.status = MemberStatus::Degraded;
				} else {
					member.status = MemberStatus::Active;
				}
			}
			let total = pool.members.len().max(1);
			let active = pool.active_members().count();
			pool.status = if active * 2 < total { PoolStatus::Degraded } else { PoolStatus::Active };
			dirty.push(pool.clone());
		}
		for pool in dirty {
			self.save(&pool).await?;
		}
		Ok(())
	}

	async fn distribution_sweep(&mut self) -> Result<()> {
		let ready: Vec<String> = self
			.pools
			.values()
			.filter(|p| p.status == PoolStatus::Active && p.rewards_pending >= self.config.reward_threshold)
			.map(|p| p.pool_id.clone())
			.collect();
		for pool_id in ready {
			if let Err(e) = self.distribute_rewards(pool_id.clone()).await {
				log::error!("scheduled distribution for {} failed: {}", pool_id, e);
			}
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for PoolCoordinator {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create pool indexes: {}", e);
		}
		if let Err(e) = self.load().await {
			log::error!("failed to load pools: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.sync_interval_secs), || SyncTick);
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.health_check_interval_secs), || HealthTick);
		spawn_ticker(addr, Duration::from_secs(self.config.distribution_interval_secs), || DistributionTick);
	}
}

struct SyncTick;

impl Message for SyncTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<SyncTick> for PoolCoordinator {
	async fn handle(&mut self, _: SyncTick, _: &mut Context<Self>) {
		if let Err(e) = self.sync_pass().await {
			log::error!("pool sync pass failed: {}", e);
		}
	}
}

struct HealthTick;

impl Message for HealthTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<HealthTick> for PoolCoordinator {
	async fn handle(&mut self, _: HealthTick, _: &mut Context<Self>) {
		if let Err(e) = self.health_pass().await {
			log::error!("pool health pass failed: {}", e);
		}
	}
}

struct DistributionTick;

impl Message for DistributionTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<DistributionTick> for PoolCoordinator {
	async fn handle(&mut self, _: DistributionTick, _: &mut Context<Self>) {
		if let Err(e) = self.distribution_sweep().await {
			log::error!("distribution sweep failed: {}", e);
		}
	}
}

pub struct CreatePool {
	pub creator: NodeId,
	pub name: String,
	pub description: String,
	pub configuration: PoolConfiguration,
}

impl Message for CreatePool {
	type Result = Result<NodePool>;
}

#[async_trait::async_trait]
impl Handler<CreatePool> for PoolCoordinator {
	async fn handle(&mut self, msg: CreatePool, _: &mut Context<Self>) -> Result<NodePool> {
		self.create_pool(msg.creator, msg.name, msg.description, msg.configuration).await
	}
}

pub struct RequestJoinPool {
	pub node_id: NodeId,
	pub pool_id: String,
	pub message: String,
}

impl Message for RequestJoinPool {
	type Result = Result<JoinRequest>;
}

#[async_trait::async_trait]
impl Handler<RequestJoinPool> for PoolCoordinator {
	async fn handle(&mut self, msg: RequestJoinPool, _: &mut Context<Self>) -> Result<JoinRequest> {
		self.request_join(msg.node_id, msg.pool_id, msg.message).await
	}
}

pub struct ApproveJoinRequest {
	pub request_id: String,
	pub approver: NodeId,
}

impl Message for ApproveJoinRequest {
	type Result = Result<NodePool>;
}

#[async_trait::async_trait]
impl Handler<ApproveJoinRequest> for PoolCoordinator {
	async fn handle(&mut self, msg: ApproveJoinRequest, _: &mut Context<Self>) -> Result<NodePool> {
		self.approve_join(msg.request_id, msg.approver).await
	}
}

pub struct LeavePool {
	pub node_id: NodeId,
	pub pool_id: String,
}

impl Message for LeavePool {
	type Result = Result<NodePool>;
}

#[async_trait::async_trait]
impl Handler<LeavePool> for PoolCoordinator {
	async fn handle(&mut self, msg: LeavePool, _: &mut Context<Self>) -> Result<NodePool> {
		self.leave_pool(msg.node_id, msg.pool_id).await
	}
}

pub struct SyncWorkCredits {
	pub pool_id: String,
	pub node_credits: BTreeMap<NodeId, f64>,
}

impl Message for SyncWorkCredits {
	type Result = Result<()>;
}

#[async_trait::async_trait]
impl Handler<SyncWorkCredits> for PoolCoordinator {
	async fn handle(&mut self, msg: SyncWorkCredits, _: &mut Context<Self>) -> Result<()> {
		self.sync_work_credits(msg.pool_id, msg.node_credits).await
	}
}

/// Credit rewards into a pool's pending balance; distribution pays them out.
pub struct AccruePoolRewards {
	pub pool_id: String,
	pub amount: f64,
}

impl Message for AccruePoolRewards {
	type Result = Result<()>;
}

#[async_trait::async_trait]
impl Handler<AccruePoolRewards> for PoolCoordinator {
	async fn handle(&mut self, msg: AccruePoolRewards, _: &mut Context<Self>) -> Result<()> {
		if msg.amount <= 0.0 || !msg.amount.is_finite() {
			return Err(Error::validation("reward accrual must be positive"));
		}
		let pool = self.pool_mut(&msg.pool_id)?;
		pool.rewards_pending += msg.amount;
		let snapshot = pool.clone();
		self.save(&snapshot).await?;
		Ok(())
	}
}

pub struct DistributeRewards(pub String);

impl Message for DistributeRewards {
	type Result = Result<BTreeMap<NodeId, f64>>;
}

#[async_trait::async_trait]
impl Handler<DistributeRewards> for PoolCoordinator {
	async fn handle(&mut self, msg: DistributeRewards, _: &mut Context<Self>) -> Result<BTreeMap<NodeId, f64>> {
		self.distribute_rewards(msg.0).await
	}
}

pub struct GetPoolInfo(pub String);

impl Message for GetPoolInfo {
	type Result = Result<Option<NodePool>>;
}

#[async_trait::async_trait]
impl Handler<GetPoolInfo> for PoolCoordinator {
	async fn handle(&mut self, msg: GetPoolInfo, _: &mut Context<Self>) -> Result<Option<NodePool>> {
		Ok(self.pools.get(&msg.0).cloned())
	}
}

pub struct ListPools;

impl Message for ListPools {
	type Result = Result<Vec<NodePool>>;
}

#[async_trait::async_trait]
impl Handler<ListPools> for PoolCoordinator {
	async fn handle(&mut self, _: ListPools, _: &mut Context<Self>) -> Result<Vec<NodePool>> {
		Ok(self.pools.values().cloned().collect())
	}
}

#[async_trait::async_trait]
impl Handler<Die> for PoolCoordinator {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
