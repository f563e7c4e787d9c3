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

//! Shard placement: replication-factor placement with overlay-address
//! diversity. Replication itself belongs to the transport; the placer
//! models it as the shard's state machine and keeps the books.

use serde::Deserialize;
use serde_json::{json, Value};

use chrono::Utc;
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Store};

use crate::{
	actors::Die,
	error::{Error, Result},
	models::shards::{
		select_hosts, HostStatus, OperationStatus, Shard, ShardCreationTask, ShardHost, ShardStatus,
	},
};

#[derive(Clone, Debug, Deserialize)]
pub struct PlacerConfig {
	#[serde(default = "default_replication_factor")]
	pub replication_factor: usize,
	/// Advisory floor; placement still works above `replication_factor`.
	#[serde(default = "default_min_storage_hosts")]
	pub min_storage_hosts: usize,
	#[serde(default = "default_max_shards_per_host")]
	pub max_shards_per_host: usize,
	#[serde(default = "default_shard_size")]
	pub shard_size_bytes: u64,
}

impl Default for PlacerConfig {
	fn default() -> Self {
		Self {
			replication_factor: default_replication_factor(),
			min_storage_hosts: default_min_storage_hosts(),
			max_shards_per_host: default_max_shards_per_host(),
			shard_size_bytes: default_shard_size(),
		}
	}
}

const fn default_replication_factor() -> usize {
	3
}

const fn default_min_storage_hosts() -> usize {
	5
}

const fn default_max_shards_per_host() -> usize {
	1000
}

const fn default_shard_size() -> u64 {
	64 * 1024 * 1024
}

/// One chunk of session data to place.
#[derive(Clone, Debug, Deserialize)]
pub struct ChunkSpec {
	pub hash: String,
	pub size_bytes: u64,
	pub encryption_key_hash: String,
}

pub struct ShardPlacer {
	store: Store,
	config: PlacerConfig,
}

impl ShardPlacer {
	pub fn new(store: Store, config: PlacerConfig) -> Self {
		Self { store, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store.collection(collections::SHARDS).create_index(&["session_id"], false).await?;
		self.store.collection(collections::SHARDS).create_index(&["status"], false).await?;
		self.store.collection(collections::SHARD_HOSTS).create_index(&["status"], false).await?;
		Ok(())
	}

	async fn register_host(
		&self,
		node_id: NodeId,
		onion_address: String,
		port: u16,
		capacity_bytes: u64,
		bandwidth_mbps: f64,
	) -> Result<ShardHost> {
		if !onion_address.ends_with(".onion") {
			return Err(Error::validation("storage hosts must advertise an .onion address"));
		}
		if capacity_bytes < self.config.shard_size_bytes {
			return Err(Error::validation("host capacity below a single shard"));
		}
		let hosts = self.store.collection(collections::SHARD_HOSTS);
		let host = match hosts.get::<ShardHost>(&node_id).await? {
			Some(mut existing) => {
				existing.onion_address = onion_address;
				existing.port = port;
				existing.capacity_bytes = capacity_bytes;
				existing.bandwidth_mbps = bandwidth_mbps;
				if existing.status == HostStatus::Offline {
					existing.status = HostStatus::Available;
				}
				existing
			}
			None => ShardHost {
				node_id: node_id.clone(),
				onion_address,
				port,
				status: HostStatus::Available,
				capacity_bytes,
				used_bytes: 0,
				bandwidth_mbps,
				assigned_shards: Default::default(),
				last_health_check: None,
				performance_score: 0.5,
			},
		};
		hosts.upsert(&host.node_id, &host).await?;
		log::info!("storage host {} registered ({} GiB)", host.node_id, host.capacity_bytes >> 30);
		Ok(host)
	}

	async fn acceptable_hosts(&self, size_needed: u64) -> Result<Vec<ShardHost>> {
		let hosts: Vec<ShardHost> = self
			.store
			.collection(collections::SHARD_HOSTS)
			.find(&Filter::new().eq("status", "available"), &[], None)
			.await?;
		Ok(hosts
			.into_iter()
			.filter(|h| h.can_accept(self.config.max_shards_per_host) && h.available_bytes() >= size_needed)
			.collect())
	}

	/// Place one shard per chunk. Each shard walks
	/// `creating → assigned → replicating → ready`; host accounting moves
	/// with it.
	async fn create_shards(&self, session_id: String, chunks: Vec<ChunkSpec>) -> Result<ShardCreationTask> {
		if chunks.is_empty() {
			return Err(Error::validation("session has no chunks to place"));
		}
		let mut task = ShardCreationTask {
			task_id: util::fresh_id(),
			session_id: session_id.clone(),
			shard_ids: Vec::with_capacity(chunks.len()),
			status: OperationStatus::InProgress,
			created_at: Utc::now(),
			completed_at: None,
			error: None,
		};
		self.store.collection(collections::SHARD_CREATION_TASKS).upsert(&task.task_id, &task).await?;

		let result = self.place_all(&mut task, &chunks).await;
		match result {
			Ok(()) => {
				task.status = OperationStatus::Completed;
				task.completed_at = Some(Utc::now());
			}
			Err(ref e) => {
				task.status = OperationStatus::Failed;
				task.error = Some(e.to_string());
			}
		}
		self.store.collection(collections::SHARD_CREATION_TASKS).upsert(&task.task_id, &task).await?;
		result.map(|_| task)
	}

	async fn place_all(&self, task: &mut ShardCreationTask, chunks: &[ChunkSpec]) -> Result<()> {
		let shards_col = self.store.collection(collections::SHARDS);
		let hosts_col = self.store.collection(collections::SHARD_HOSTS);
		for (index, chunk) in chunks.iter().enumerate() {
			let candidates = self.acceptable_hosts(chunk.size_bytes).await?;
			if candidates.len() < self.config.replication_factor {
				return Err(Error::precondition(format!(
					"insufficient storage hosts: {} < {}",
					candidates.len(),
					self.config.replication_factor
				)));
			}
			if candidates.len() < self.config.min_storage_hosts {
				log::warn!(
					"placing with only {} hosts (floor {})",
					candidates.len(),
					self.config.min_storage_hosts
				);
			}
			let refs: Vec<&ShardHost> = candidates.iter().collect();
			let assigned = select_hosts(&refs, self.config.replication_factor);

			let now = Utc::now();
			let mut shard = Shard {
				shard_id: util::fresh_id(),
				session_id: task.session_id.clone(),
				chunk_index: index as u32,
				data_hash: chunk.hash.clone(),
				size_bytes: chunk.size_bytes,
				status: ShardStatus::Creating,
				assigned_hosts: Vec::new(),
				encryption_key_hash: chunk.encryption_key_hash.clone(),
				compression_ratio: 1.0,
				created_at: now,
				updated_at: now,
			};
			shards_col.upsert(&shard.shard_id, &shard).await?;

			shard.assigned_hosts = assigned;
			shard.status = ShardStatus::Assigned;
			shard.updated_at = Utc::now();
			shards_col.upsert(&shard.shard_id, &shard).await?;

			for node_id in &shard.assigned_hosts {
				if let Some(mut host) = hosts_col.get::<ShardHost>(node_id).await? {
					host.assigned_shards.insert(shard.shard_id.clone());
					host.used_bytes += chunk.size_bytes;
					hosts_col.upsert(&host.node_id, &host).await?;
				}
			}

			// replication is the transport's job; the placer walks the
			// state machine it will confirm
			shard.status = ShardStatus::Replicating;
			shard.updated_at = Utc::now();
			shards_col.upsert(&shard.shard_id, &shard).await?;
			shard.status = ShardStatus::Ready;
			shard.updated_at = Utc::now();
			shards_col.upsert(&shard.shard_id, &shard).await?;

			task.shard_ids.push(shard.shard_id.clone());
			log::info!(
				"shard {} placed on {:?} for session {}",
				shard.shard_id,
				shard.assigned_hosts,
				task.session_id
			);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for ShardPlacer {
	async fn started(&mut self, _: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create shard indexes: {}", e);
		}
	}
}

pub struct RegisterStorageHost {
	pub node_id: NodeId,
	pub onion_address: String,
	pub port: u16,
	pub capacity_bytes: u64,
	pub bandwidth_mbps: f64,
}

impl Message for RegisterStorageHost {
	type Result = Result<ShardHost>;
}

#[async_trait::async_trait]
impl Handler<RegisterStorageHost> for ShardPlacer {
	async fn handle(&mut self, msg: RegisterStorageHost, _: &mut Context<Self>) -> Result<ShardHost> {
		self.register_host(msg.node_id, msg.onion_address, msg.port, msg.capacity_bytes, msg.bandwidth_mbps)
			.await
	}
}

pub struct CreateShardsForSession {
	pub session_id: String,
	pub chunks: Vec<ChunkSpec>,
}

impl Message for CreateShardsForSession {
	type Result = Result<ShardCreationTask>;
}

#[async_trait::async_trait]
impl Handler<CreateShardsForSession> for ShardPlacer {
	async fn handle(&mut self, msg: CreateShardsForSession, _: &mut Context<Self>) -> Result<ShardCreationTask> {
		self.create_shards(msg.session_id, msg.chunks).await
	}
}

pub struct GetShardHosts(pub String);

impl Message for GetShardHosts {
	type Result = Result<Option<Vec<NodeId>>>;
}

#[async_trait::async_trait]
impl Handler<GetShardHosts> for ShardPlacer {
	async fn handle(&mut self, msg: GetShardHosts, _: &mut Context<Self>) -> Result<Option<Vec<NodeId>>> {
		let shard: Option<Shard> = self.store.collection(collections::SHARDS).get(&msg.0).await?;
		Ok(shard.map(|s| s.assigned_hosts))
	}
}

pub struct GetCreationTask(pub String);

impl Message for GetCreationTask {
	type Result = Result<Option<ShardCreationTask>>;
}

#[async_trait::async_trait]
impl Handler<GetCreationTask> for ShardPlacer {
	async fn handle(&mut self, msg: GetCreationTask, _: &mut Context<Self>) -> Result<Option<ShardCreationTask>> {
		Ok(self.store.collection(collections::SHARD_CREATION_TASKS).get(&msg.0).await?)
	}
}

pub struct StorageHostsStatus;

impl Message for StorageHostsStatus {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<StorageHostsStatus> for ShardPlacer {
	async fn handle(&mut self, _: StorageHostsStatus, _: &mut Context<Self>) -> Result<Value> {
		let hosts: Vec<ShardHost> =
			self.store.collection(collections::SHARD_HOSTS).find(&Filter::new(), &[], None).await?;
		let available = hosts.iter().filter(|h| h.status == HostStatus::Available).count();
		let total_capacity: u64 = hosts.iter().map(|h| h.capacity_bytes).sum();
		let total_used: u64 = hosts.iter().map(|h| h.used_bytes).sum();
		let total_shards: usize = hosts.iter().map(|h| h.assigned_shards.len()).sum();
		Ok(json!({
			"hosts_total": hosts.len(),
			"hosts_available": available,
			"capacity_bytes": total_capacity,
			"used_bytes": total_used,
			"assigned_shards": total_shards,
		}))
	}
}

#[async_trait::async_trait]
impl Handler<Die> for ShardPlacer {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
