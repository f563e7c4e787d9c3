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

//! Payout batching: eligibility gates, request lifecycle, batched
//! submission to the value network and status tracking. Failed requests
//! stay failed; retrying is an operator decision.

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Sort, Store};

use crate::{
	actors::{spawn_ticker, Die},
	error::{Error, Result},
	models::payouts::{
		build_batches, check_eligibility, Eligibility, PayoutBatch, PayoutKind, PayoutPolicy,
		PayoutRequest, PayoutStatus,
	},
	valuenet::ValueNetwork,
};

#[derive(Clone, Debug, Deserialize)]
pub struct PayoutsConfig {
	#[serde(default = "default_threshold")]
	pub threshold: f64,
	#[serde(default = "default_fee_percentage")]
	pub fee_percentage: f64,
	#[serde(default = "default_min_amount")]
	pub min_amount: f64,
	#[serde(default = "default_max_amount")]
	pub max_amount: f64,
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_max_batch_amount")]
	pub max_batch_amount: f64,
	#[serde(default = "default_process_interval")]
	pub process_interval_secs: u64,
	#[serde(default = "default_history_retention")]
	pub history_retention_days: u32,
}

impl Default for PayoutsConfig {
	fn default() -> Self {
		Self {
			threshold: default_threshold(),
			fee_percentage: default_fee_percentage(),
			min_amount: default_min_amount(),
			max_amount: default_max_amount(),
			batch_size: default_batch_size(),
			max_batch_amount: default_max_batch_amount(),
			process_interval_secs: default_process_interval(),
			history_retention_days: default_history_retention(),
		}
	}
}

const fn default_threshold() -> f64 {
	10.0
}

const fn default_fee_percentage() -> f64 {
	1.0
}

const fn default_min_amount() -> f64 {
	1.0
}

const fn default_max_amount() -> f64 {
	10_000.0
}

const fn default_batch_size() -> usize {
	20
}

const fn default_max_batch_amount() -> f64 {
	50_000.0
}

const fn default_process_interval() -> u64 {
	300
}

const fn default_history_retention() -> u32 {
	90
}

impl PayoutsConfig {
	fn policy(&self) -> PayoutPolicy {
		PayoutPolicy {
			min_amount: self.min_amount,
			max_amount: self.max_amount,
			threshold: self.threshold,
			fee_percentage: self.fee_percentage,
			batch_size: self.batch_size,
			max_batch_amount: self.max_batch_amount,
		}
	}
}

pub struct PayoutBatcher {
	store: Store,
	value_network: Arc<dyn ValueNetwork>,
	config: PayoutsConfig,
}

impl PayoutBatcher {
	pub fn new(store: Store, value_network: Arc<dyn ValueNetwork>, config: PayoutsConfig) -> Self {
		Self { store, value_network, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store
			.collection(collections::PAYOUT_REQUESTS)
			.create_index(&["status", "created_at"], false)
			.await?;
		self.store
			.collection(collections::PAYOUT_REQUESTS)
			.create_index(&["node_id"], false)
			.await?;
		Ok(())
	}

	async fn create(
		&self,
		node_id: NodeId,
		payout_type: PayoutKind,
		amount: f64,
		recipient_address: String,
	) -> Result<PayoutRequest> {
		let eligibility = check_eligibility(&self.config.policy(), amount)?;
		if recipient_address.is_empty() {
			return Err(Error::validation("payout needs a recipient address"));
		}
		let request = PayoutRequest {
			request_id: util::fresh_id(),
			node_id,
			payout_type,
			amount: eligibility.amount,
			fee: eligibility.fee,
			net_amount: eligibility.net_amount,
			recipient_address,
			status: PayoutStatus::Pending,
			created_at: Utc::now(),
			processed_at: None,
			external_tx_hash: None,
			error: None,
		};
		self.store.collection(collections::PAYOUT_REQUESTS).upsert(&request.request_id, &request).await?;
		log::info!(
			"payout {} created for {}: {} ({} net)",
			request.request_id,
			request.node_id,
			request.amount,
			request.net_amount
		);
		Ok(request)
	}

	async fn submit_request(&self, request: &mut PayoutRequest) {
		match self.value_network.send_usdt(&request.recipient_address, request.net_amount).await {
			Ok(tx_hash) => {
				self.store
					.cache_set(
						&format!("payout_tx:{}", tx_hash),
						json!({ "request_id": request.request_id }),
						Duration::from_secs(3600),
					)
					.await;
				let record = json!({
					"tx_hash": tx_hash,
					"request_id": request.request_id,
					"to": request.recipient_address,
					"amount": request.net_amount,
					"submitted_at": Utc::now().timestamp_micros(),
				});
				if let Err(e) =
					self.store.collection(collections::TRON_TRANSACTIONS).upsert(&tx_hash, &record).await
				{
					log::warn!("failed to record external transaction {}: {}", tx_hash, e);
				}
				request.status = PayoutStatus::Completed;
				request.external_tx_hash = Some(tx_hash);
				request.processed_at = Some(Utc::now());
			}
			Err(e) => {
				log::error!("payout {} failed: {}", request.request_id, e);
				request.status = PayoutStatus::Failed;
				request.error = Some(e.to_string());
				request.processed_at = Some(Utc::now());
			}
		}
	}

	/// Drain pending requests in batches bounded by count and amount. A
	/// batch whose members all settle completes; any member failure marks
	/// the batch failed and leaves those members `failed`.
	async fn process_pending(&self) -> Result<Value> {
		let requests_col = self.store.collection(collections::PAYOUT_REQUESTS);
		let pending: Vec<PayoutRequest> = requests_col
			.find(&Filter::new().eq("status", "pending"), &[Sort::asc("created_at")], None)
			.await?;
		if pending.is_empty() {
			return Ok(json!({ "processed": 0, "failed": 0, "batches": 0 }));
		}
		let batches = build_batches(&self.config.policy(), &pending);
		let mut processed = 0u64;
		let mut failed = 0u64;
		for request_ids in &batches {
			let mut batch = PayoutBatch {
				batch_id: util::fresh_id(),
				request_ids: request_ids.clone(),
				total_amount: 0.0,
				status: PayoutStatus::Processing,
				created_at: Utc::now(),
				submitted_at: None,
			};
			let mut members: Vec<PayoutRequest> = pending
				.iter()
				.filter(|r| request_ids.contains(&r.request_id))
				.cloned()
				.collect();
			batch.total_amount = members.iter().map(|r| r.amount).sum();
			self.store.collection(collections::PAYOUT_BATCHES).upsert(&batch.batch_id, &batch).await?;

			for request in members.iter_mut() {
				request.status = PayoutStatus::Processing;
				requests_col.upsert(&request.request_id, request).await?;
				self.submit_request(request).await;
				requests_col.upsert(&request.request_id, request).await?;
				match request.status {
					PayoutStatus::Completed => processed += 1,
					_ => failed += 1,
				}
			}

			batch.status = if members.iter().all(|r| r.status == PayoutStatus::Completed) {
				PayoutStatus::Completed
			} else {
				PayoutStatus::Failed
			};
			batch.submitted_at = Some(Utc::now());
			self.store.collection(collections::PAYOUT_BATCHES).upsert(&batch.batch_id, &batch).await?;
		}
		log::info!("payout pass: {} completed, {} failed, {} batches", processed, failed, batches.len());
		Ok(json!({ "processed": processed, "failed": failed, "batches": batches.len() }))
	}

	async fn cleanup(&self) -> Result<()> {
		let cutoff = (Utc::now()
			- ChronoDuration::days(self.config.history_retention_days as i64))
		.timestamp_micros();
		let removed = self
			.store
			.collection(collections::PAYOUT_REQUESTS)
			.delete_many(
				&Filter::new()
					.is_in("status", vec!["completed", "cancelled"])
					.lt("created_at", cutoff),
			)
			.await?;
		if removed > 0 {
			log::info!("payout history cleanup removed {} requests", removed);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for PayoutBatcher {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create payout indexes: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.process_interval_secs), || ProcessTick);
		spawn_ticker(addr, Duration::from_secs(24 * 3600), || CleanupTick);
	}
}

struct ProcessTick;

impl Message for ProcessTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<ProcessTick> for PayoutBatcher {
	async fn handle(&mut self, _: ProcessTick, _: &mut Context<Self>) {
		if let Err(e) = self.process_pending().await {
			log::error!("payout processing pass failed: {}", e);
		}
	}
}

struct CleanupTick;

impl Message for CleanupTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<CleanupTick> for PayoutBatcher {
	async fn handle(&mut self, _: CleanupTick, _: &mut Context<Self>) {
		if let Err(e) = self.cleanup().await {
			log::error!("payout cleanup failed: {}", e);
		}
	}
}

pub struct CheckPayoutEligibility {
	pub amount: f64,
}

impl Message for CheckPayoutEligibility {
	type Result = Result<Eligibility>;
}

#[async_trait::async_trait]
impl Handler<CheckPayoutEligibility> for PayoutBatcher {
	async fn handle(&mut self, msg: CheckPayoutEligibility, _: &mut Context<Self>) -> Result<Eligibility> {
		check_eligibility(&self.config.policy(), msg.amount)
	}
}

pub struct CreatePayout {
	pub node_id: NodeId,
	pub payout_type: PayoutKind,
	pub amount: f64,
	pub recipient_address: String,
}

impl Message for CreatePayout {
	type Result = Result<PayoutRequest>;
}

#[async_trait::async_trait]
impl Handler<CreatePayout> for PayoutBatcher {
	async fn handle(&mut self, msg: CreatePayout, _: &mut Context<Self>) -> Result<PayoutRequest> {
		PayoutBatcher::create(self, msg.node_id, msg.payout_type, msg.amount, msg.recipient_address).await
	}
}

pub struct ProcessPending;

impl Message for ProcessPending {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<ProcessPending> for PayoutBatcher {
	async fn handle(&mut self, _: ProcessPending, _: &mut Context<Self>) -> Result<Value> {
		self.process_pending().await
	}
}

pub struct CancelPayout {
	pub request_id: String,
	pub node_id: NodeId,
}

impl Message for CancelPayout {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<CancelPayout> for PayoutBatcher {
	async fn handle(&mut self, msg: CancelPayout, _: &mut Context<Self>) -> Result<bool> {
		let requests = self.store.collection(collections::PAYOUT_REQUESTS);
		let mut request: PayoutRequest = match requests.get(&msg.request_id).await? {
			Some(r) => r,
			None => return Ok(false),
		};
		if request.node_id != msg.node_id {
			return Err(Error::precondition("only the requesting node may cancel a payout"));
		}
		if request.status != PayoutStatus::Pending {
			return Err(Error::precondition(format!(
				"payout {} is {:?}; only pending payouts cancel",
				msg.request_id, request.status
			)));
		}
		request.status = PayoutStatus::Cancelled;
		request.processed_at = Some(Utc::now());
		requests.upsert(&request.request_id, &request).await?;
		Ok(true)
	}
}

pub struct GetPayoutStatus(pub String);

impl Message for GetPayoutStatus {
	type Result = Result<Option<PayoutRequest>>;
}

#[async_trait::async_trait]
impl Handler<GetPayoutStatus> for PayoutBatcher {
	async fn handle(&mut self, msg: GetPayoutStatus, _: &mut Context<Self>) -> Result<Option<PayoutRequest>> {
		Ok(self.store.collection(collections::PAYOUT_REQUESTS).get(&msg.0).await?)
	}
}

pub struct GetPayoutHistory {
	pub node_id: Option<NodeId>,
	pub limit: i64,
}

impl Message for GetPayoutHistory {
	type Result = Result<Vec<PayoutRequest>>;
}

#[async_trait::async_trait]
impl Handler<GetPayoutHistory> for PayoutBatcher {
	async fn handle(&mut self, msg: GetPayoutHistory, _: &mut Context<Self>) -> Result<Vec<PayoutRequest>> {
		let mut filter = Filter::new();
		if let Some(node_id) = msg.node_id {
			filter = filter.eq("node_id", node_id);
		}
		let history = self
			.store
			.collection(collections::PAYOUT_REQUESTS)
			.find(&filter, &[Sort::desc("created_at")], Some(msg.limit))
			.await?;
		Ok(history)
	}
}

#[async_trait::async_trait]
impl Handler<Die> for PayoutBatcher {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
