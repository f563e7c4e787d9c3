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

//! Shard operations: host health polling, sampled integrity checks, repair,
//! maintenance windows, rebalancing and retention of the records all of
//! that produces.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Store};

use crate::{
	actors::{spawn_ticker, Die},
	error::{Error, Result},
	models::{
		peer::Peer,
		shards::{
			plan_rebalance, HostMetricsReport, HostStatus, IntegrityCheck, MaintenanceKind,
			MaintenanceWindow, OperationStatus, PerformanceSample, RepairOperation, Shard,
			ShardHost, ShardStatus,
		},
	},
	overlay::OverlayApi,
};

#[derive(Clone, Debug, Deserialize)]
pub struct ShardManagerConfig {
	#[serde(default = "default_health_interval")]
	pub health_interval_secs: u64,
	#[serde(default = "default_integrity_interval")]
	pub integrity_interval_secs: u64,
	/// Shards sampled per integrity cycle.
	#[serde(default = "default_integrity_sample")]
	pub integrity_sample: usize,
	#[serde(default = "default_rebalance_interval")]
	pub rebalance_interval_secs: u64,
	#[serde(default = "default_max_migrations")]
	pub max_migrations_per_cycle: usize,
	#[serde(default = "default_metrics_retention")]
	pub metrics_retention_days: u32,
	#[serde(default = "default_integrity_retention")]
	pub integrity_retention_days: u32,
	#[serde(default = "default_repair_retention")]
	pub repair_retention_days: u32,
}

impl Default for ShardManagerConfig {
	fn default() -> Self {
		Self {
			health_interval_secs: default_health_interval(),
			integrity_interval_secs: default_integrity_interval(),
			integrity_sample: default_integrity_sample(),
			rebalance_interval_secs: default_rebalance_interval(),
			max_migrations_per_cycle: default_max_migrations(),
			metrics_retention_days: default_metrics_retention(),
			integrity_retention_days: default_integrity_retention(),
			repair_retention_days: default_repair_retention(),
		}
	}
}

const fn default_health_interval() -> u64 {
	60
}

const fn default_integrity_interval() -> u64 {
	3600
}

const fn default_integrity_sample() -> usize {
	10
}

const fn default_rebalance_interval() -> u64 {
	1800
}

const fn default_max_migrations() -> usize {
	5
}

const fn default_metrics_retention() -> u32 {
	7
}

const fn default_integrity_retention() -> u32 {
	30
}

const fn default_repair_retention() -> u32 {
	7
}

/// Composite score in `[0, 1]` from a host's latest metrics; placement
/// orders candidates by it.
fn performance_score(metrics: &HostMetricsReport) -> f64 {
	let uptime = (metrics.uptime_percentage / 100.0).clamp(0.0, 1.0);
	let latency = 1.0 - (metrics.response_time_ms / 5_000.0).clamp(0.0, 1.0);
	let reliability = (1.0 - metrics.error_rate).clamp(0.0, 1.0);
	uptime * 0.5 + latency * 0.3 + reliability * 0.2
}

pub struct ShardManager {
	store: Store,
	overlay: Arc<dyn OverlayApi>,
	config: ShardManagerConfig,
}

impl ShardManager {
	pub fn new(store: Store, overlay: Arc<dyn OverlayApi>, config: ShardManagerConfig) -> Self {
		Self { store, overlay, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store
			.collection(collections::PERFORMANCE_METRICS)
			.create_index(&["node_id", "recorded_at"], false)
			.await?;
		self.store
			.collection(collections::INTEGRITY_CHECKS)
			.create_index(&["shard_id"], false)
			.await?;
		self.store
			.collection(collections::REPAIR_OPERATIONS)
			.create_index(&["status"], false)
			.await?;
		self.store
			.collection(collections::MAINTENANCE_WINDOWS)
			.create_index(&["node_id", "status"], false)
			.await?;
		Ok(())
	}

	async fn hosts(&self) -> Result<Vec<ShardHost>> {
		Ok(self.store.collection(collections::SHARD_HOSTS).find(&Filter::new(), &[], None).await?)
	}

	async fn save_host(&self, host: &ShardHost) -> Result<()> {
		self.store.collection(collections::SHARD_HOSTS).upsert(&host.node_id, host).await?;
		Ok(())
	}

	/// Poll every host's overlay metrics endpoint. Hosts absent from the
	/// peer directory go offline; metric bounds decide degraded/available.
	async fn health_pass(&self) -> Result<()> {
		let now = Utc::now();
		for mut host in self.hosts().await? {
			if host.status == HostStatus::Busy {
				// in a maintenance window; leave it alone
				continue;
			}
			let known: Option<Peer> =
				self.store.collection(collections::PEERS).get(&host.node_id).await?;
			if known.is_none() {
				if host.status != HostStatus::Offline {
					host.status = HostStatus::Offline;
					self.save_host(&host).await?;
					log::warn!("storage host {} left the peer directory; offline", host.node_id);
				}
				continue;
			}
			match self.overlay.health_metrics(&host.onion_address, host.port).await {
				Ok(metrics) => {
					let sample = PerformanceSample {
						sample_id: util::fresh_id(),
						node_id: host.node_id.clone(),
						metrics,
						recorded_at: now,
					};
					self.store
						.collection(collections::PERFORMANCE_METRICS)
						.upsert(&sample.sample_id, &sample)
						.await?;
					host.performance_score = performance_score(&metrics);
					host.last_health_check = Some(now);
					host.status = if metrics.is_degraded() {
						HostStatus::Degraded
					} else {
						HostStatus::Available
					};
					self.save_host(&host).await?;
				}
				Err(e) => {
					log::debug!("health poll of {} failed: {}", host.node_id, e);
					host.status = HostStatus::Offline;
					self.save_host(&host).await?;
				}
			}
		}
		Ok(())
	}

	/// Check one replica set: ask each assigned host for its hash of the
	/// shard and compare with the recorded hash. Mismatches open a repair.
	async fn check_shard(&self, shard: &Shard) -> Result<Vec<IntegrityCheck>> {
		let mut checks = Vec::new();
		let now = Utc::now();
		for node_id in &shard.assigned_hosts {
			let host: Option<ShardHost> =
				self.store.collection(collections::SHARD_HOSTS).get(node_id).await?;
			let host = match host {
				Some(h) => h,
				None => continue,
			};
			let reported = self.overlay.shard_hash(&host.onion_address, host.port, &shard.shard_id).await;
			let (actual, passed) = match reported {
				Ok(hash) => {
					let ok = hash == shard.data_hash;
					(Some(hash), ok)
				}
				Err(_) => (None, false),
			};
			let check = IntegrityCheck {
				check_id: util::fresh_id(),
				shard_id: shard.shard_id.clone(),
				host_id: node_id.clone(),
				expected_hash: shard.data_hash.clone(),
				actual_hash: actual,
				passed,
				checked_at: now,
			};
			self.store.collection(collections::INTEGRITY_CHECKS).upsert(&check.check_id, &check).await?;
			if !passed {
				self.open_repair(shard, node_id).await?;
			}
			checks.push(check);
		}
		Ok(checks)
	}

	async fn open_repair(&self, shard: &Shard, failed_host: &str) -> Result<()> {
		let repairs = self.store.collection(collections::REPAIR_OPERATIONS);
		let already_open = repairs
			.count(
				&Filter::new()
					.eq("shard_id", shard.shard_id.as_str())
					.eq("failed_host", failed_host)
					.is_in("status", vec!["pending", "in_progress"]),
			)
			.await?;
		if already_open > 0 {
			return Ok(());
		}
		let repair = RepairOperation {
			repair_id: util::fresh_id(),
			shard_id: shard.shard_id.clone(),
			failed_host: failed_host.to_string(),
			replacement_host: None,
			source_hosts: shard
				.assigned_hosts
				.iter()
				.filter(|h| h.as_str() != failed_host)
				.cloned()
				.collect(),
			status: OperationStatus::Pending,
			created_at: Utc::now(),
			completed_at: None,
			error: None,
		};
		repairs.upsert(&repair.repair_id, &repair).await?;

		let mut degraded = shard.clone();
		degraded.status = ShardStatus::Degraded;
		degraded.updated_at = Utc::now();
		self.store.collection(collections::SHARDS).upsert(&degraded.shard_id, &degraded).await?;
		log::warn!("integrity mismatch on {}/{}; repair {} opened", shard.shard_id, failed_host, repair.repair_id);
		Ok(())
	}

	async fn integrity_pass(&self) -> Result<()> {
		let ready: Vec<Shard> = self
			.store
			.collection(collections::SHARDS)
			.find(&Filter::new().is_in("status", vec!["ready", "degraded"]), &[], None)
			.await?;
		let mut sampled: Vec<&Shard> = ready.iter().collect();
		sampled.shuffle(&mut rand::thread_rng());
		for shard in sampled.into_iter().take(self.config.integrity_sample) {
			if let Err(e) = self.check_shard(shard).await {
				log::error!("integrity check of {} failed: {}", shard.shard_id, e);
			}
		}
		Ok(())
	}

	/// Execute pending repairs: pick a replacement outside the current
	/// replica set, swap it in (primary position preserved for survivors),
	/// and release the failed host's accounting.
	async fn repair_pass(&self) -> Result<()> {
		let pending: Vec<RepairOperation> = self
			.store
			.collection(collections::REPAIR_OPERATIONS)
			.find(&Filter::new().eq("status", "pending"), &[], Some(32))
			.await?;
		for mut repair in pending {
			repair.status = OperationStatus::InProgress;
			self.store
				.collection(collections::REPAIR_OPERATIONS)
				.upsert(&repair.repair_id, &repair)
				.await?;

			let shard: Option<Shard> =
				self.store.collection(collections::SHARDS).get(&repair.shard_id).await?;
			let mut shard = match shard {
				Some(s) => s,
				None => {
					repair.status = OperationStatus::Failed;
					repair.error = Some("shard vanished".into());
					self.store
						.collection(collections::REPAIR_OPERATIONS)
						.upsert(&repair.repair_id, &repair)
						.await?;
					continue;
				}
			};

			let candidates: Vec<ShardHost> = self
				.store
				.collection(collections::SHARD_HOSTS)
				.find(&Filter::new().eq("status", "available"), &[], None)
				.await?;
			let replacement = candidates
				.iter()
				.filter(|h| !shard.assigned_hosts.contains(&h.node_id))
				.max_by(|a, b| {
					a.performance_score
						.partial_cmp(&b.performance_score)
						.unwrap_or(std::cmp::Ordering::Equal)
				})
				.map(|h| h.node_id.clone());

			match replacement {
				Some(new_host) => {
					shard.assigned_hosts.retain(|h| h != &repair.failed_host);
					shard.assigned_hosts.push(new_host.clone());
					shard.status = ShardStatus::Ready;
					shard.updated_at = Utc::now();
					self.store.collection(collections::SHARDS).upsert(&shard.shard_id, &shard).await?;
					self.move_host_accounting(&repair.failed_host, &new_host, &shard).await?;
					repair.replacement_host = Some(new_host);
					repair.status = OperationStatus::Completed;
					repair.completed_at = Some(Utc::now());
					log::info!(
						"repaired shard {}: {} -> {:?}",
						shard.shard_id,
						repair.failed_host,
						repair.replacement_host
					);
				}
				None => {
					repair.status = OperationStatus::Failed;
					repair.error = Some("no replacement host available".into());
					log::error!("repair {} has no replacement host", repair.repair_id);
				}
			}
			self.store
				.collection(collections::REPAIR_OPERATIONS)
				.upsert(&repair.repair_id, &repair)
				.await?;
		}
		Ok(())
	}

	async fn move_host_accounting(&self, from: &str, to: &str, shard: &Shard) -> Result<()> {
		let hosts = self.store.collection(collections::SHARD_HOSTS);
		if let Some(mut host) = hosts.get::<ShardHost>(from).await? {
			host.assigned_shards.remove(&shard.shard_id);
			host.used_bytes = host.used_bytes.saturating_sub(shard.size_bytes);
			hosts.upsert(&host.node_id, &host).await?;
		}
		if let Some(mut host) = hosts.get::<ShardHost>(to).await? {
			host.assigned_shards.insert(shard.shard_id.clone());
			host.used_bytes += shard.size_bytes;
			hosts.upsert(&host.node_id, &host).await?;
		}
		Ok(())
	}

	async fn maintenance_pass(&self) -> Result<()> {
		let now = Utc::now();
		let windows: Vec<MaintenanceWindow> = self
			.store
			.collection(collections::MAINTENANCE_WINDOWS)
			.find(&Filter::new().is_in("status", vec!["pending", "in_progress"]), &[], None)
			.await?;
		for mut window in windows {
			match window.status {
				OperationStatus::Pending if now >= window.starts_at => {
					if let Some(mut host) =
						self.store.collection(collections::SHARD_HOSTS).get::<ShardHost>(&window.node_id).await?
					{
						window.affected_shards = host.assigned_shards.iter().cloned().collect();
						window.backup_hosts = self
							.hosts()
							.await?
							.into_iter()
							.filter(|h| h.status == HostStatus::Available && h.node_id != window.node_id)
							.map(|h| h.node_id)
							.take(2)
							.collect();
						host.status = HostStatus::Busy;
						self.save_host(&host).await?;
					}
					window.status = OperationStatus::InProgress;
					self.store
						.collection(collections::MAINTENANCE_WINDOWS)
						.upsert(&window.window_id, &window)
						.await?;
					log::info!("maintenance window {} started on {}", window.window_id, window.node_id);
				}
				OperationStatus::InProgress if now >= window.ends_at => {
					if let Some(mut host) =
						self.store.collection(collections::SHARD_HOSTS).get::<ShardHost>(&window.node_id).await?
					{
						host.status = HostStatus::Available;
						self.save_host(&host).await?;
					}
					window.status = OperationStatus::Completed;
					self.store
						.collection(collections::MAINTENANCE_WINDOWS)
						.upsert(&window.window_id, &window)
						.await?;
					log::info!("maintenance window {} finished on {}", window.window_id, window.node_id);
				}
				_ => {}
			}
		}
		Ok(())
	}

	async fn rebalance_pass(&self) -> Result<()> {
		let hosts = self.hosts().await?;
		let shards: Vec<Shard> = self
			.store
			.collection(collections::SHARDS)
			.find(&Filter::new().eq("status", "ready"), &[], None)
			.await?;
		let moves = plan_rebalance(&hosts, &shards, self.config.max_migrations_per_cycle);
		for migration in moves {
			let shard: Option<Shard> =
				self.store.collection(collections::SHARDS).get(&migration.shard_id).await?;
			let mut shard = match shard {
				Some(s) => s,
				None => continue,
			};
			shard.status = ShardStatus::Migrating;
			shard.updated_at = Utc::now();
			self.store.collection(collections::SHARDS).upsert(&shard.shard_id, &shard).await?;

			for host_id in shard.assigned_hosts.iter_mut() {
				if *host_id == migration.from {
					*host_id = migration.to.clone();
				}
			}
			shard.status = ShardStatus::Ready;
			shard.updated_at = Utc::now();
			self.store.collection(collections::SHARDS).upsert(&shard.shard_id, &shard).await?;
			self.move_host_accounting(&migration.from, &migration.to, &shard).await?;
			log::info!(
				"rebalanced shard {}: {} -> {}",
				migration.shard_id,
				migration.from,
				migration.to
			);
		}
		Ok(())
	}

	async fn optimize_pass(&self) -> Result<()> {
		let now = Utc::now();
		let metrics_cutoff =
			(now - ChronoDuration::days(self.config.metrics_retention_days as i64)).timestamp_micros();
		let integrity_cutoff =
			(now - ChronoDuration::days(self.config.integrity_retention_days as i64)).timestamp_micros();
		let repair_cutoff =
			(now - ChronoDuration::days(self.config.repair_retention_days as i64)).timestamp_micros();

		let metrics = self
			.store
			.collection(collections::PERFORMANCE_METRICS)
			.delete_many(&Filter::new().lt("recorded_at", metrics_cutoff))
			.await?;
		let checks = self
			.store
			.collection(collections::INTEGRITY_CHECKS)
			.delete_many(&Filter::new().lt("checked_at", integrity_cutoff))
			.await?;
		let repairs = self
			.store
			.collection(collections::REPAIR_OPERATIONS)
			.delete_many(&Filter::new().eq("status", "completed").lt("created_at", repair_cutoff))
			.await?;
		log::info!(
			"optimization purged {} metric samples, {} integrity checks, {} repairs",
			metrics,
			checks,
			repairs
		);
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for ShardManager {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create shard-manager indexes: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.health_interval_secs), || HealthTick);
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.integrity_interval_secs), || IntegrityTick);
		spawn_ticker(addr.clone(), Duration::from_secs(60), || RepairTick);
		spawn_ticker(addr.clone(), Duration::from_secs(60), || MaintenanceTick);
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.rebalance_interval_secs), || RebalanceTick);
		spawn_ticker(addr, Duration::from_secs(24 * 3600), || OptimizeTick);
	}
}

macro_rules! tick {
	($name:ident, $method:ident, $label:literal) => {
		struct $name;

		impl Message for $name {
			type Result = ();
		}

		#[async_trait::async_trait]
		impl Handler<$name> for ShardManager {
			async fn handle(&mut self, _: $name, _: &mut Context<Self>) {
				if let Err(e) = self.$method().await {
					log::error!(concat!($label, " failed: {}"), e);
				}
			}
		}
	};
}

tick!(HealthTick, health_pass, "host health pass");
tick!(IntegrityTick, integrity_pass, "integrity pass");
tick!(RepairTick, repair_pass, "repair pass");
tick!(MaintenanceTick, maintenance_pass, "maintenance pass");
tick!(RebalanceTick, rebalance_pass, "rebalance pass");
tick!(OptimizeTick, optimize_pass, "optimization pass");

pub struct ScheduleMaintenance {
	pub node_id: NodeId,
	pub maintenance_type: MaintenanceKind,
	pub starts_at: chrono::DateTime<Utc>,
	pub duration_secs: u64,
}

impl Message for ScheduleMaintenance {
	type Result = Result<MaintenanceWindow>;
}

#[async_trait::async_trait]
impl Handler<ScheduleMaintenance> for ShardManager {
	async fn handle(&mut self, msg: ScheduleMaintenance, _: &mut Context<Self>) -> Result<MaintenanceWindow> {
		if msg.duration_secs == 0 {
			return Err(Error::validation("maintenance window needs a duration"));
		}
		let host: Option<ShardHost> =
			self.store.collection(collections::SHARD_HOSTS).get(&msg.node_id).await?;
		if host.is_none() {
			return Err(Error::validation(format!("unknown storage host {}", msg.node_id)));
		}
		let window = MaintenanceWindow {
			window_id: util::fresh_id(),
			node_id: msg.node_id,
			maintenance_type: msg.maintenance_type,
			status: OperationStatus::Pending,
			starts_at: msg.starts_at,
			ends_at: msg.starts_at + ChronoDuration::seconds(msg.duration_secs as i64),
			affected_shards: Vec::new(),
			backup_hosts: Vec::new(),
		};
		self.store
			.collection(collections::MAINTENANCE_WINDOWS)
			.upsert(&window.window_id, &window)
			.await?;
		Ok(window)
	}
}

pub struct TriggerIntegrityCheck(pub String);

impl Message for TriggerIntegrityCheck {
	type Result = Result<Vec<IntegrityCheck>>;
}

#[async_trait::async_trait]
impl Handler<TriggerIntegrityCheck> for ShardManager {
	async fn handle(&mut self, msg: TriggerIntegrityCheck, _: &mut Context<Self>) -> Result<Vec<IntegrityCheck>> {
		let shard: Shard = self
			.store
			.collection(collections::SHARDS)
			.get(&msg.0)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown shard {}", msg.0)))?;
		self.check_shard(&shard).await
	}
}

pub struct GetHostPerformance {
	pub node_id: NodeId,
	pub hours: i64,
}

impl Message for GetHostPerformance {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<GetHostPerformance> for ShardManager {
	async fn handle(&mut self, msg: GetHostPerformance, _: &mut Context<Self>) -> Result<Value> {
		let cutoff = (Utc::now() - ChronoDuration::hours(msg.hours)).timestamp_micros();
		let samples: Vec<PerformanceSample> = self
			.store
			.collection(collections::PERFORMANCE_METRICS)
			.find(
				&Filter::new().eq("node_id", msg.node_id.as_str()).gte("recorded_at", cutoff),
				&[],
				None,
			)
			.await?;
		if samples.is_empty() {
			return Ok(json!({ "node_id": msg.node_id, "samples": 0 }));
		}
		let n = samples.len() as f64;
		let avg_response: f64 = samples.iter().map(|s| s.metrics.response_time_ms).sum::<f64>() / n;
		let avg_uptime: f64 = samples.iter().map(|s| s.metrics.uptime_percentage).sum::<f64>() / n;
		let avg_error: f64 = samples.iter().map(|s| s.metrics.error_rate).sum::<f64>() / n;
		Ok(json!({
			"node_id": msg.node_id,
			"samples": samples.len(),
			"avg_response_time_ms": avg_response,
			"avg_uptime_percentage": avg_uptime,
			"avg_error_rate": avg_error,
		}))
	}
}

pub struct SystemHealth;

impl Message for SystemHealth {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<SystemHealth> for ShardManager {
	async fn handle(&mut self, _: SystemHealth, _: &mut Context<Self>) -> Result<Value> {
		let hosts = self.hosts().await?;
		let shards = self.store.collection(collections::SHARDS);
		let total = shards.count(&Filter::new()).await?;
		let ready = shards.count(&Filter::new().eq("status", "ready")).await?;
		let degraded = shards.count(&Filter::new().eq("status", "degraded")).await?;
		let open_repairs = self
			.store
			.collection(collections::REPAIR_OPERATIONS)
			.count(&Filter::new().is_in("status", vec!["pending", "in_progress"]))
			.await?;
		let available_hosts = hosts.iter().filter(|h| h.status == HostStatus::Available).count();
		Ok(json!({
			"hosts": hosts.len(),
			"hosts_available": available_hosts,
			"shards": total,
			"shards_ready": ready,
			"shards_degraded": degraded,
			"open_repairs": open_repairs,
		}))
	}
}

#[async_trait::async_trait]
impl Handler<Die> for ShardManager {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
