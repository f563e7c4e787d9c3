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

//! Operator sync engine: operator registry, replicated operation queue,
//! conflict log with automatic resolution, deterministic leader election
//! and state checkpoints with rollback.

use std::time::{Duration, Instant};

use chrono::Utc;
use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Sort, Store};

use crate::{
	actors::{spawn_ticker, Die},
	error::{Error, Result},
	models::sync::{
		elect_leader, validate_state_update, ConflictKind, ConflictStatus, OperationKind,
		OperationStatus, Operator, OperatorMetrics, OperatorRole, StateCheckpoint, SyncConflict,
		SyncOperation, SyncStatus,
	},
};

#[derive(Clone, Debug, Deserialize)]
pub struct OperatorSyncConfig {
	#[serde(default = "default_heartbeat")]
	pub heartbeat_secs: u64,
	/// Seconds without a heartbeat before an operator is marked offline.
	#[serde(default = "default_operator_timeout")]
	pub operator_timeout_secs: u64,
	#[serde(default = "default_conflict_interval")]
	pub conflict_interval_secs: u64,
	#[serde(default = "default_max_retries")]
	pub max_sync_retries: u32,
	#[serde(default = "default_checkpoint_interval")]
	pub checkpoint_interval_secs: u64,
	/// Operations drained per queue pass.
	#[serde(default = "default_batch_size")]
	pub operation_batch_size: i64,
	/// Priority at and above which an operation executes on submit.
	#[serde(default = "default_immediate_priority")]
	pub immediate_priority: u8,
}

impl Default for OperatorSyncConfig {
	fn default() -> Self {
		Self {
			heartbeat_secs: default_heartbeat(),
			operator_timeout_secs: default_operator_timeout(),
			conflict_interval_secs: default_conflict_interval(),
			max_sync_retries: default_max_retries(),
			checkpoint_interval_secs: default_checkpoint_interval(),
			operation_batch_size: default_batch_size(),
			immediate_priority: default_immediate_priority(),
		}
	}
}

const fn default_heartbeat() -> u64 {
	30
}

const fn default_operator_timeout() -> u64 {
	300
}

const fn default_conflict_interval() -> u64 {
	60
}

const fn default_max_retries() -> u32 {
	3
}

const fn default_checkpoint_interval() -> u64 {
	900
}

const fn default_batch_size() -> i64 {
	100
}

const fn default_immediate_priority() -> u8 {
	4
}

pub struct OperatorSyncEngine {
	store: Store,
	config: OperatorSyncConfig,
	operator_id: String,
	node_id: NodeId,
	operators: HashMap<String, Operator>,
	/// Replicated state this operator applies operations against.
	state: Map<String, Value>,
	state_version: u64,
	last_checkpoint: Option<StateCheckpoint>,
	metrics: OperatorMetrics,
}

impl OperatorSyncEngine {
	pub fn new(store: Store, config: OperatorSyncConfig, node_id: NodeId) -> Self {
		let operator_id = format!("op-{}", node_id);
		let metrics = OperatorMetrics::new(operator_id.clone());
		Self {
			store,
			config,
			operator_id,
			node_id,
			operators: HashMap::new(),
			state: Map::new(),
			state_version: 0,
			last_checkpoint: None,
			metrics,
		}
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store.collection(collections::OPERATORS).create_index(&["sync_status"], false).await?;
		self.store
			.collection(collections::SYNC_OPERATIONS)
			.create_index(&["status", "priority"], false)
			.await?;
		self.store.collection(collections::SYNC_CONFLICTS).create_index(&["status"], false).await?;
		self.store
			.collection(collections::STATE_CHECKPOINTS)
			.create_index(&["operator_id", "version"], false)
			.await?;
		Ok(())
	}

	async fn load(&mut self) -> Result<()> {
		let operators: Vec<Operator> =
			self.store.collection(collections::OPERATORS).find(&Filter::new(), &[], None).await?;
		self.operators = operators.into_iter().map(|o| (o.operator_id.clone(), o)).collect();

		let latest: Option<StateCheckpoint> = self
			.store
			.collection(collections::STATE_CHECKPOINTS)
			.find(
				&Filter::new().eq("operator_id", self.operator_id.as_str()),
				&[Sort::desc("version")],
				Some(1),
			)
			.await?
			.pop();
		if let Some(checkpoint) = latest {
			self.state = checkpoint.state_data.as_object().cloned().unwrap_or_default();
			self.state_version = checkpoint.version;
			self.last_checkpoint = Some(checkpoint);
			log::info!("restored state from checkpoint at version {}", self.state_version);
		}

		if let Some(metrics) = self
			.store
			.collection(collections::OPERATOR_METRICS)
			.get::<OperatorMetrics>(&self.operator_id)
			.await?
		{
			self.metrics = metrics;
		}

		// this daemon is always an operator of its own plane
		if !self.operators.contains_key(&self.operator_id) {
			let role = if self.operators.values().any(|o| o.role == OperatorRole::Primary) {
				OperatorRole::Secondary
			} else {
				OperatorRole::Primary
			};
			let me = Operator {
				operator_id: self.operator_id.clone(),
				node_id: self.node_id.clone(),
				role,
				endpoint: String::new(),
				public_key: String::new(),
				sync_status: SyncStatus::InSync,
				last_heartbeat: Utc::now(),
				capabilities: vec!["sync".into(), "checkpoint".into()],
				state_version: self.state_version,
			};
			self.save_operator(&me).await?;
			self.operators.insert(me.operator_id.clone(), me);
		}
		Ok(())
	}

	async fn save_operator(&self, operator: &Operator) -> Result<()> {
		self.store.collection(collections::OPERATORS).upsert(&operator.operator_id, operator).await?;
		Ok(())
	}

	fn is_primary(&self) -> bool {
		self.operators
			.get(&self.operator_id)
			.map_or(false, |op| op.role == OperatorRole::Primary)
	}

	async fn heartbeat(&mut self) -> Result<()> {
		let now = Utc::now();
		if let Some(me) = self.operators.get_mut(&self.operator_id) {
			me.last_heartbeat = now;
			me.sync_status = SyncStatus::InSync;
			me.state_version = self.state_version;
			let snapshot = me.clone();
			self.save_operator(&snapshot).await?;
		}
		let timeout = self.config.operator_timeout_secs;
		let mut stale = Vec::new();
		for operator in self.operators.values_mut() {
			if operator.operator_id != self.operator_id
				&& operator.sync_status != SyncStatus::Offline
				&& operator.is_offline(now, timeout)
			{
				operator.sync_status = SyncStatus::Offline;
				stale.push(operator.clone());
			}
		}
		for operator in stale {
			log::warn!("operator {} went offline", operator.operator_id);
			self.save_operator(&operator).await?;
		}
		Ok(())
	}

	async fn submit(
		&mut self,
		operation_type: OperationKind,
		payload: Value,
		target_operators: Vec<String>,
		priority: u8,
	) -> Result<SyncOperation> {
		let priority = priority.clamp(1, 5);
		let mut operation = SyncOperation {
			op_id: util::fresh_id(),
			initiator: self.operator_id.clone(),
			operation_type,
			payload,
			target_operators,
			priority,
			status: OperationStatus::Pending,
			retry_count: 0,
			created_at: Utc::now(),
			executed_at: None,
			error: None,
		};
		self.store.collection(collections::SYNC_OPERATIONS).upsert(&operation.op_id, &operation).await?;
		if priority >= self.config.immediate_priority {
			self.execute(&mut operation).await;
			self.store
				.collection(collections::SYNC_OPERATIONS)
				.upsert(&operation.op_id, &operation)
				.await?;
		}
		Ok(operation)
	}

	/// Execute one operation against local state, tracking retries and
	/// metrics. Failures stay on the queue until `max_sync_retries`.
	async fn execute(&mut self, operation: &mut SyncOperation) {
		operation.status = OperationStatus::Executing;
		let started = Instant::now();
		let outcome = self.apply(operation).await;
		let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
		match outcome {
			Ok(()) => {
				operation.status = OperationStatus::Completed;
				operation.executed_at = Some(Utc::now());
				operation.error = None;
				self.metrics.record(elapsed_ms, true);
			}
			Err(e) => {
				operation.retry_count += 1;
				operation.error = Some(e.to_string());
				operation.status = if operation.retry_count >= self.config.max_sync_retries {
					log::error!("operation {} failed permanently: {}", operation.op_id, e);
					OperationStatus::Failed
				} else {
					OperationStatus::Pending
				};
				self.metrics.record(elapsed_ms, false);
			}
		}
	}

	async fn apply(&mut self, operation: &SyncOperation) -> Result<()> {
		match operation.operation_type {
			OperationKind::StateUpdate => {
				if !validate_state_update(&operation.payload) {
					return Err(Error::validation(
						"state update payload empty or carrying reserved keys",
					));
				}
				if let Some(changes) = operation.payload.as_object() {
					for (key, value) in changes {
						self.state.insert(key.clone(), value.clone());
					}
				}
				self.state_version += 1;
				Ok(())
			}
			OperationKind::Configuration => {
				let entry = self
					.state
					.entry("configuration".to_string())
					.or_insert_with(|| Value::Object(Map::new()));
				if let (Some(target), Some(changes)) = (entry.as_object_mut(), operation.payload.as_object()) {
					for (key, value) in changes {
						target.insert(key.clone(), value.clone());
					}
				}
				Ok(())
			}
			OperationKind::Checkpoint => {
				self.create_checkpoint(None).await?;
				Ok(())
			}
			OperationKind::Emergency => {
				match operation.payload.get("action").and_then(Value::as_str) {
					Some("failover") => self.run_election().await,
					Some("rollback") => self.rollback().await,
					other => Err(Error::validation(format!(
						"unknown emergency action {:?}",
						other
					))),
				}
			}
			// replication bookkeeping only; nothing to apply locally
			OperationKind::Transaction | OperationKind::Maintenance => Ok(()),
		}
	}

	async fn process_queue(&mut self) -> Result<()> {
		let pending: Vec<SyncOperation> = self
			.store
			.collection(collections::SYNC_OPERATIONS)
			.find(
				&Filter::new().eq("status", "pending"),
				&[Sort::desc("priority"), Sort::asc("created_at")],
				Some(self.config.operation_batch_size),
			)
			.await?;
		for mut operation in pending {
			self.execute(&mut operation).await;
			self.store
				.collection(collections::SYNC_OPERATIONS)
				.upsert(&operation.op_id, &operation)
				.await?;
		}
		Ok(())
	}

	async fn create_checkpoint(&mut self, state: Option<Value>) -> Result<StateCheckpoint> {
		let state_data = state.unwrap_or_else(|| Value::Object(self.state.clone()));
		if let Some(map) = state_data.as_object() {
			self.state = map.clone();
		}
		let checkpoint = StateCheckpoint {
			checkpoint_id: util::fresh_id(),
			operator_id: self.operator_id.clone(),
			state_hash: StateCheckpoint::hash_state(&state_data),
			state_data,
			version: self.state_version + 1,
			created_at: Utc::now(),
		};
		self.state_version = checkpoint.version;
		self.store
			.collection(collections::STATE_CHECKPOINTS)
			.upsert(&checkpoint.checkpoint_id, &checkpoint)
			.await?;
		log::info!("checkpoint {} at version {} ({})", checkpoint.checkpoint_id, checkpoint.version, checkpoint.state_hash);
		self.last_checkpoint = Some(checkpoint.clone());
		Ok(checkpoint)
	}

	/// Restore the last checkpoint and broadcast a priority-5 emergency so
	/// peer operators follow.
	async fn rollback(&mut self) -> Result<()> {
		let checkpoint = self
			.last_checkpoint
			.clone()
			.ok_or_else(|| Error::precondition("no checkpoint to roll back to"))?;
		self.state = checkpoint.state_data.as_object().cloned().unwrap_or_default();
		self.state_version = checkpoint.version.saturating_sub(1);
		log::warn!("rolled back to checkpoint {} (version {})", checkpoint.checkpoint_id, self.state_version);

		let notice = SyncOperation {
			op_id: util::fresh_id(),
			initiator: self.operator_id.clone(),
			operation_type: OperationKind::Emergency,
			payload: json!({
				"action": "follow_rollback",
				"checkpoint_id": checkpoint.checkpoint_id,
				"state_hash": checkpoint.state_hash,
			}),
			target_operators: Vec::new(),
			priority: 5,
			status: OperationStatus::Completed,
			retry_count: 0,
			created_at: Utc::now(),
			executed_at: Some(Utc::now()),
			error: None,
		};
		self.store.collection(collections::SYNC_OPERATIONS).upsert(&notice.op_id, &notice).await?;
		Ok(())
	}

	/// Deterministic election over the registry; demotes the previous
	/// primary and is a no-op when the winner already leads.
	async fn run_election(&mut self) -> Result<()> {
		let operators: Vec<Operator> = self.operators.values().cloned().collect();
		let winner = match elect_leader(&operators) {
			Some(winner) => winner.operator_id.clone(),
			None => {
				log::warn!("leader election found no eligible operator");
				return Ok(());
			}
		};
		let mut changed = Vec::new();
		for operator in self.operators.values_mut() {
			if operator.operator_id == winner {
				if operator.role != OperatorRole::Primary {
					operator.role = OperatorRole::Primary;
					changed.push(operator.clone());
				}
			} else if operator.role == OperatorRole::Primary {
				operator.role = OperatorRole::Secondary;
				changed.push(operator.clone());
			}
		}
		for operator in &changed {
			self.save_operator(operator).await?;
		}
		if !changed.is_empty() {
			log::info!("leader election: {} is primary", winner);
		}
		Ok(())
	}

	async fn report_conflict(
		&mut self,
		kind: ConflictKind,
		involved: Vec<String>,
		data: Value,
	) -> Result<SyncConflict> {
		let conflict = SyncConflict {
			conflict_id: util::fresh_id(),
			conflict_type: kind,
			involved_operators: involved,
			data,
			status: ConflictStatus::Open,
			resolution: None,
			created_at: Utc::now(),
			resolved_at: None,
		};
		self.store.collection(collections::SYNC_CONFLICTS).upsert(&conflict.conflict_id, &conflict).await?;
		log::warn!("conflict reported: {:?} ({})", kind, conflict.conflict_id);
		Ok(conflict)
	}

	async fn resolve_conflicts(&mut self) -> Result<()> {
		let open: Vec<SyncConflict> = self
			.store
			.collection(collections::SYNC_CONFLICTS)
			.find(&Filter::new().eq("status", "open"), &[], Some(64))
			.await?;
		for mut conflict in open {
			let resolution = match conflict.conflict_type {
				ConflictKind::StateDivergence | ConflictKind::TimestampConflict => {
					Some("latest_timestamp_wins".to_string())
				}
				ConflictKind::OperationConflict => Some("highest_priority_wins".to_string()),
				ConflictKind::VersionConflict => Some("highest_version_wins".to_string()),
				ConflictKind::LeadershipConflict => {
					self.run_election().await?;
					Some("deterministic_election".to_string())
				}
			};
			conflict.status = ConflictStatus::Resolved;
			conflict.resolution = resolution;
			conflict.resolved_at = Some(Utc::now());
			self.store
				.collection(collections::SYNC_CONFLICTS)
				.upsert(&conflict.conflict_id, &conflict)
				.await?;
			log::info!(
				"conflict {} resolved via {}",
				conflict.conflict_id,
				conflict.resolution.as_deref().unwrap_or("-")
			);
		}
		Ok(())
	}

	async fn persist_metrics(&mut self) -> Result<()> {
		self.metrics.updated_at = Utc::now();
		self.store
			.collection(collections::OPERATOR_METRICS)
			.upsert(&self.operator_id.clone(), &self.metrics)
			.await?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for OperatorSyncEngine {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create sync indexes: {}", e);
		}
		if let Err(e) = self.load().await {
			log::error!("failed to load operator registry: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.heartbeat_secs), || Heartbeat);
		spawn_ticker(addr.clone(), Duration::from_secs(10), || ProcessQueue);
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.conflict_interval_secs), || ResolveConflicts);
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.checkpoint_interval_secs), || CheckpointTick);
		spawn_ticker(addr, Duration::from_secs(300), || PersistMetrics);
	}
}

struct Heartbeat;

impl Message for Heartbeat {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Heartbeat> for OperatorSyncEngine {
	async fn handle(&mut self, _: Heartbeat, _: &mut Context<Self>) {
		if let Err(e) = self.heartbeat().await {
			log::error!("heartbeat failed: {}", e);
		}
	}
}

struct ProcessQueue;

impl Message for ProcessQueue {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<ProcessQueue> for OperatorSyncEngine {
	async fn handle(&mut self, _: ProcessQueue, _: &mut Context<Self>) {
		if let Err(e) = self.process_queue().await {
			log::error!("operation queue pass failed: {}", e);
		}
	}
}

struct ResolveConflicts;

impl Message for ResolveConflicts {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<ResolveConflicts> for OperatorSyncEngine {
	async fn handle(&mut self, _: ResolveConflicts, _: &mut Context<Self>) {
		if let Err(e) = self.resolve_conflicts().await {
			log::error!("conflict resolution pass failed: {}", e);
		}
	}
}

struct CheckpointTick;

impl Message for CheckpointTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<CheckpointTick> for OperatorSyncEngine {
	async fn handle(&mut self, _: CheckpointTick, _: &mut Context<Self>) {
		// scheduled checkpoints are the primary's job
		if !self.is_primary() {
			return;
		}
		if let Err(e) = self.create_checkpoint(None).await {
			log::error!("scheduled checkpoint failed: {}", e);
		}
	}
}

struct PersistMetrics;

impl Message for PersistMetrics {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<PersistMetrics> for OperatorSyncEngine {
	async fn handle(&mut self, _: PersistMetrics, _: &mut Context<Self>) {
		if let Err(e) = self.persist_metrics().await {
			log::error!("metrics persist failed: {}", e);
		}
	}
}

pub struct RegisterOperator {
	pub node_id: NodeId,
	pub endpoint: String,
	pub public_key: String,
	pub role: OperatorRole,
	pub capabilities: Vec<String>,
}

impl Message for RegisterOperator {
	type Result = Result<Operator>;
}

#[async_trait::async_trait]
impl Handler<RegisterOperator> for OperatorSyncEngine {
	async fn handle(&mut self, msg: RegisterOperator, _: &mut Context<Self>) -> Result<Operator> {
		if msg.role == OperatorRole::Primary
			&& self.operators.values().any(|o| o.role == OperatorRole::Primary)
		{
			return Err(Error::precondition("a primary operator already exists"));
		}
		let operator = Operator {
			operator_id: format!("op-{}", msg.node_id),
			node_id: msg.node_id,
			role: msg.role,
			endpoint: msg.endpoint,
			public_key: msg.public_key,
			sync_status: SyncStatus::Syncing,
			last_heartbeat: Utc::now(),
			capabilities: msg.capabilities,
			state_version: 0,
		};
		self.save_operator(&operator).await?;
		self.operators.insert(operator.operator_id.clone(), operator.clone());
		log::info!("registered operator {} ({:?})", operator.operator_id, operator.role);
		Ok(operator)
	}
}

pub struct SubmitOperation {
	pub operation_type: OperationKind,
	pub payload: Value,
	pub target_operators: Vec<String>,
	pub priority: u8,
}

impl Message for SubmitOperation {
	type Result = Result<SyncOperation>;
}

#[async_trait::async_trait]
impl Handler<SubmitOperation> for OperatorSyncEngine {
	async fn handle(&mut self, msg: SubmitOperation, _: &mut Context<Self>) -> Result<SyncOperation> {
		self.submit(msg.operation_type, msg.payload, msg.target_operators, msg.priority).await
	}
}

pub struct CreateCheckpoint(pub Option<Value>);

impl Message for CreateCheckpoint {
	type Result = Result<StateCheckpoint>;
}

#[async_trait::async_trait]
impl Handler<CreateCheckpoint> for OperatorSyncEngine {
	async fn handle(&mut self, msg: CreateCheckpoint, _: &mut Context<Self>) -> Result<StateCheckpoint> {
		self.create_checkpoint(msg.0).await
	}
}

pub struct Rollback;

impl Message for Rollback {
	type Result = Result<()>;
}

#[async_trait::async_trait]
impl Handler<Rollback> for OperatorSyncEngine {
	async fn handle(&mut self, _: Rollback, _: &mut Context<Self>) -> Result<()> {
		self.rollback().await
	}
}

pub struct ReportConflict {
	pub conflict_type: ConflictKind,
	pub involved_operators: Vec<String>,
	pub data: Value,
}

impl Message for ReportConflict {
	type Result = Result<SyncConflict>;
}

#[async_trait::async_trait]
impl Handler<ReportConflict> for OperatorSyncEngine {
	async fn handle(&mut self, msg: ReportConflict, _: &mut Context<Self>) -> Result<SyncConflict> {
		self.report_conflict(msg.conflict_type, msg.involved_operators, msg.data).await
	}
}

pub struct GetOperatorStatus(pub String);

impl Message for GetOperatorStatus {
	type Result = Result<Option<Operator>>;
}

#[async_trait::async_trait]
impl Handler<GetOperatorStatus> for OperatorSyncEngine {
	async fn handle(&mut self, msg: GetOperatorStatus, _: &mut Context<Self>) -> Result<Option<Operator>> {
		Ok(self.operators.get(&msg.0).cloned())
	}
}

pub struct GetSystemStatus;

impl Message for GetSystemStatus {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<GetSystemStatus> for OperatorSyncEngine {
	async fn handle(&mut self, _: GetSystemStatus, _: &mut Context<Self>) -> Result<Value> {
		let online = self
			.operators
			.values()
			.filter(|o| o.sync_status != SyncStatus::Offline)
			.count();
		let pending = self
			.store
			.collection(collections::SYNC_OPERATIONS)
			.count(&Filter::new().eq("status", "pending"))
			.await?;
		let open_conflicts = self
			.store
			.collection(collections::SYNC_CONFLICTS)
			.count(&Filter::new().eq("status", "open"))
			.await?;
		Ok(json!({
			"operator_id": self.operator_id,
			"is_primary": self.is_primary(),
			"operators_known": self.operators.len(),
			"operators_online": online,
			"state_version": self.state_version,
			"pending_operations": pending,
			"open_conflicts": open_conflicts,
		}))
	}
}

pub struct GetOperatorMetrics(pub String);

impl Message for GetOperatorMetrics {
	type Result = Result<Option<OperatorMetrics>>;
}

#[async_trait::async_trait]
impl Handler<GetOperatorMetrics> for OperatorSyncEngine {
	async fn handle(&mut self, msg: GetOperatorMetrics, _: &mut Context<Self>) -> Result<Option<OperatorMetrics>> {
		if msg.0 == self.operator_id {
			return Ok(Some(self.metrics.clone()));
		}
		Ok(self.store.collection(collections::OPERATOR_METRICS).get(&msg.0).await?)
	}
}

pub struct ForceResync {
	pub target_operator: Option<String>,
}

impl Message for ForceResync {
	type Result = Result<usize>;
}

#[async_trait::async_trait]
impl Handler<ForceResync> for OperatorSyncEngine {
	async fn handle(&mut self, msg: ForceResync, _: &mut Context<Self>) -> Result<usize> {
		let mut marked = Vec::new();
		for operator in self.operators.values_mut() {
			let selected = msg
				.target_operator
				.as_ref()
				.map_or(operator.operator_id != self.operator_id, |t| *t == operator.operator_id);
			if selected {
				operator.sync_status = SyncStatus::Syncing;
				marked.push(operator.clone());
			}
		}
		for operator in &marked {
			self.save_operator(operator).await?;
		}
		Ok(marked.len())
	}
}

#[async_trait::async_trait]
impl Handler<Die> for OperatorSyncEngine {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
