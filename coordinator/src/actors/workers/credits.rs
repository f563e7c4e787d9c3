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

//! Work-credits engine: slot-quantized proof collection, sliding-window
//! accounting and the per-epoch ranking tally.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hashbrown::HashSet;
use serde::Deserialize;
use xtra::prelude::*;

use coordinator_common::{time, NodeId};
use coordinator_store::{collections, Filter, Sort, Store};

use crate::{
	actors::{spawn_ticker, Die},
	crypto,
	error::{Error, Result},
	models::credits::{assign_ranks, tally_key, TaskKind, WorkProof, WorkTally},
};

#[derive(Clone, Debug, Deserialize)]
pub struct CreditsConfig {
	#[serde(default = "default_slot_duration")]
	pub slot_duration_secs: u64,
	/// Sliding window for credit accounting.
	#[serde(default = "default_window_days")]
	pub window_days: u32,
	/// Seconds between tally passes.
	#[serde(default = "default_tally_interval")]
	pub tally_interval_secs: u64,
	/// Proofs older than this are swept.
	#[serde(default = "default_retention_days")]
	pub retention_days: u32,
}

impl Default for CreditsConfig {
	fn default() -> Self {
		Self {
			slot_duration_secs: default_slot_duration(),
			window_days: default_window_days(),
			tally_interval_secs: default_tally_interval(),
			retention_days: default_retention_days(),
		}
	}
}

const fn default_slot_duration() -> u64 {
	time::DEFAULT_SLOT_DURATION_SECS
}

const fn default_window_days() -> u32 {
	7
}

const fn default_tally_interval() -> u64 {
	600
}

const fn default_retention_days() -> u32 {
	90
}

pub struct WorkCreditsEngine {
	store: Store,
	config: CreditsConfig,
}

/// Outcome of a proof submission; duplicates leave the original untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
	Accepted,
	Duplicate,
}

impl WorkCreditsEngine {
	pub fn new(store: Store, config: CreditsConfig) -> Self {
		Self { store, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		let proofs = self.store.collection(collections::TASK_PROOFS);
		proofs.create_index(&["node_id", "slot", "task_type"], true).await?;
		proofs.create_index(&["slot"], false).await?;
		proofs.create_index(&["pool_id"], false).await?;
		let tally = self.store.collection(collections::WORK_TALLY);
		tally.create_index(&["entity_id", "epoch"], true).await?;
		tally.create_index(&["epoch", "rank"], false).await?;
		Ok(())
	}

	async fn submit(&self, proof: WorkProof) -> Result<SubmitOutcome> {
		if proof.value < 0.0 || !proof.value.is_finite() {
			return Err(Error::validation("work proof value must be non-negative"));
		}
		if proof.slot < 0 {
			return Err(Error::validation("work proof slot precedes genesis"));
		}
		if !crypto::verify_work_proof(&proof) {
			return Err(Error::Integrity(format!("bad work proof signature from {}", proof.node_id)));
		}
		let accepted =
			self.store.collection(collections::TASK_PROOFS).insert(&proof.key(), &proof).await?;
		if accepted {
			log::debug!("accepted {} proof from {}", proof.task_type.as_str(), proof.node_id);
			Ok(SubmitOutcome::Accepted)
		} else {
			log::debug!("duplicate proof from {} for slot {}", proof.node_id, proof.slot);
			Ok(SubmitOutcome::Duplicate)
		}
	}

	fn entity_filter(entity_id: &str, cutoff_slot: i64) -> Filter {
		Filter::new().gte("slot", cutoff_slot).any(vec![
			Filter::new().eq("node_id", entity_id),
			Filter::new().eq("pool_id", entity_id),
		])
	}

	async fn calculate_credits(&self, entity_id: &str, window_days: u32) -> Result<f64> {
		let cutoff = Utc::now() - ChronoDuration::days(window_days as i64);
		let cutoff_slot = time::slot_at(cutoff, self.config.slot_duration_secs);
		let proofs: Vec<WorkProof> = self
			.store
			.collection(collections::TASK_PROOFS)
			.find(&Self::entity_filter(entity_id, cutoff_slot), &[], None)
			.await?;
		Ok(proofs.iter().map(WorkProof::credits).sum())
	}

	/// Beacon rate over the trailing day, clamped to `[0, 1]`.
	async fn live_score(&self, entity_id: &str) -> Result<f64> {
		let cutoff = Utc::now() - ChronoDuration::hours(24);
		let cutoff_slot = time::slot_at(cutoff, self.config.slot_duration_secs);
		let beacons = self
			.store
			.collection(collections::TASK_PROOFS)
			.count(
				&Self::entity_filter(entity_id, cutoff_slot)
					.eq("task_type", TaskKind::UptimeBeacon.as_str()),
			)
			.await?;
		let expected = time::slots_in(86_400, self.config.slot_duration_secs).max(1);
		Ok((beacons as f64 / expected as f64).min(1.0))
	}

	/// Recompute the tally for `epoch`: every entity seen in any proof gets
	/// one row; ranks are dense and deterministic.
	async fn update_tally(&self, epoch: i64) -> Result<usize> {
		let proofs = self.store.collection(collections::TASK_PROOFS);
		let mut entities: HashSet<String> = HashSet::new();
		let node_rows = proofs
			.aggregate(
				&coordinator_store::Pipeline::matching(Filter::new())
					.group_by("node_id")
					.accumulate("n", coordinator_store::Accumulate::Count),
			)
			.await?;
		for row in &node_rows {
			if let Some(id) = row.key_str() {
				entities.insert(id.to_string());
			}
		}
		let pool_rows = proofs
			.aggregate(
				&coordinator_store::Pipeline::matching(Filter::new().not_null("pool_id"))
					.group_by("pool_id")
					.accumulate("n", coordinator_store::Accumulate::Count),
			)
			.await?;
		for row in &pool_rows {
			if let Some(id) = row.key_str() {
				entities.insert(id.to_string());
			}
		}

		let mut tallies = Vec::with_capacity(entities.len());
		for entity_id in entities {
			let credits = self.calculate_credits(&entity_id, self.config.window_days).await?;
			let live_score = self.live_score(&entity_id).await?;
			tallies.push(WorkTally {
				entity_id,
				epoch,
				credits,
				live_score,
				rank: 0,
				last_selected_slot: None,
			});
		}
		assign_ranks(&mut tallies);

		let tally_col = self.store.collection(collections::WORK_TALLY);
		for tally in &tallies {
			tally_col.upsert(&tally.key(), tally).await?;
		}
		log::info!("updated work tally for epoch {}: {} entities", epoch, tallies.len());
		Ok(tallies.len())
	}

	async fn sweep_retention(&self) -> Result<()> {
		let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days as i64);
		let cutoff_slot = time::slot_at(cutoff, self.config.slot_duration_secs);
		let removed = self
			.store
			.collection(collections::TASK_PROOFS)
			.delete_many(&Filter::new().lt("slot", cutoff_slot))
			.await?;
		if removed > 0 {
			log::info!("retention swept {} work proofs", removed);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for WorkCreditsEngine {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create work credit indexes: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.tally_interval_secs), || Tally);
		spawn_ticker(addr, Duration::from_secs(6 * 3600), || SweepRetention);
	}
}

struct Tally;

impl Message for Tally {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Tally> for WorkCreditsEngine {
	async fn handle(&mut self, _: Tally, _: &mut Context<Self>) {
		if let Err(e) = self.update_tally(time::current_epoch()).await {
			log::error!("tally pass failed: {}", e);
		}
	}
}

struct SweepRetention;

impl Message for SweepRetention {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<SweepRetention> for WorkCreditsEngine {
	async fn handle(&mut self, _: SweepRetention, _: &mut Context<Self>) {
		if let Err(e) = self.sweep_retention().await {
			log::error!("retention sweep failed: {}", e);
		}
	}
}

pub struct SubmitWorkProof(pub WorkProof);

impl Message for SubmitWorkProof {
	type Result = Result<SubmitOutcome>;
}

#[async_trait::async_trait]
impl Handler<SubmitWorkProof> for WorkCreditsEngine {
	async fn handle(&mut self, msg: SubmitWorkProof, _: &mut Context<Self>) -> Result<SubmitOutcome> {
		self.submit(msg.0).await
	}
}

pub struct CalculateWorkCredits {
	pub entity_id: String,
	pub window_days: Option<u32>,
}

impl Message for CalculateWorkCredits {
	type Result = Result<f64>;
}

#[async_trait::async_trait]
impl Handler<CalculateWorkCredits> for WorkCreditsEngine {
	async fn handle(&mut self, msg: CalculateWorkCredits, _: &mut Context<Self>) -> Result<f64> {
		let window = msg.window_days.unwrap_or(self.config.window_days);
		self.calculate_credits(&msg.entity_id, window).await
	}
}

pub struct UpdateWorkTally {
	pub epoch: Option<i64>,
}

impl Message for UpdateWorkTally {
	type Result = Result<usize>;
}

#[async_trait::async_trait]
impl Handler<UpdateWorkTally> for WorkCreditsEngine {
	async fn handle(&mut self, msg: UpdateWorkTally, _: &mut Context<Self>) -> Result<usize> {
		self.update_tally(msg.epoch.unwrap_or_else(time::current_epoch)).await
	}
}

pub struct GetTopEntities {
	pub limit: i64,
	pub epoch: Option<i64>,
}

impl Message for GetTopEntities {
	type Result = Result<Vec<WorkTally>>;
}

#[async_trait::async_trait]
impl Handler<GetTopEntities> for WorkCreditsEngine {
	async fn handle(&mut self, msg: GetTopEntities, _: &mut Context<Self>) -> Result<Vec<WorkTally>> {
		let epoch = msg.epoch.unwrap_or_else(time::current_epoch);
		let tallies = self
			.store
			.collection(collections::WORK_TALLY)
			.find(&Filter::new().eq("epoch", epoch), &[Sort::asc("rank")], Some(msg.limit))
			.await?;
		Ok(tallies)
	}
}

pub struct GetEntityRank {
	pub entity_id: String,
	pub epoch: Option<i64>,
}

impl Message for GetEntityRank {
	type Result = Result<Option<i64>>;
}

#[async_trait::async_trait]
impl Handler<GetEntityRank> for WorkCreditsEngine {
	async fn handle(&mut self, msg: GetEntityRank, _: &mut Context<Self>) -> Result<Option<i64>> {
		let epoch = msg.epoch.unwrap_or_else(time::current_epoch);
		let tally: Option<WorkTally> = self
			.store
			.collection(collections::WORK_TALLY)
			.get(&tally_key(&msg.entity_id, epoch))
			.await?;
		Ok(tally.map(|t| t.rank))
	}
}

/// Producer convenience: record a liveness beacon for this node.
pub struct RecordUptimeBeacon {
	pub node_id: NodeId,
	pub pool_id: Option<String>,
}

impl Message for RecordUptimeBeacon {
	type Result = Result<SubmitOutcome>;
}

#[async_trait::async_trait]
impl Handler<RecordUptimeBeacon> for WorkCreditsEngine {
	async fn handle(&mut self, msg: RecordUptimeBeacon, _: &mut Context<Self>) -> Result<SubmitOutcome> {
		let now = Utc::now();
		let mut proof = WorkProof {
			node_id: msg.node_id,
			pool_id: msg.pool_id,
			slot: time::slot_at(now, self.config.slot_duration_secs),
			task_type: TaskKind::UptimeBeacon,
			value: 1.0,
			signature: String::new(),
			timestamp: now,
		};
		crypto::sign_work_proof(&mut proof);
		self.submit(proof).await
	}
}

/// Producer convenience: record relayed bandwidth, in bytes.
pub struct RecordRelayBandwidth {
	pub node_id: NodeId,
	pub bytes_relayed: u64,
	pub pool_id: Option<String>,
}

impl Message for RecordRelayBandwidth {
	type Result = Result<SubmitOutcome>;
}

#[async_trait::async_trait]
impl Handler<RecordRelayBandwidth> for WorkCreditsEngine {
	async fn handle(&mut self, msg: RecordRelayBandwidth, _: &mut Context<Self>) -> Result<SubmitOutcome> {
		let now = Utc::now();
		let mut proof = WorkProof {
			node_id: msg.node_id,
			pool_id: msg.pool_id,
			slot: time::slot_at(now, self.config.slot_duration_secs),
			task_type: TaskKind::RelayBandwidth,
			value: msg.bytes_relayed as f64 / (1u64 << 30) as f64,
			signature: String::new(),
			timestamp: now,
		};
		crypto::sign_work_proof(&mut proof);
		self.submit(proof).await
	}
}

#[async_trait::async_trait]
impl Handler<Die> for WorkCreditsEngine {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
