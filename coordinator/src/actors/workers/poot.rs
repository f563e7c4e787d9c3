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

//! Ownership-proof (PoOT) validation: challenges, proof verification, stake
//! checks against the value network, rate limiting and fraud scoring.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use xtra::prelude::*;

use coordinator_common::{util, NodeId};
use coordinator_store::{collections, Filter, Sort, Store};

use crate::{
	actors::{spawn_ticker, Die},
	crypto,
	error::{Error, Result},
	models::poot::{
		fraud_score, FraudEvent, FraudSignals, OwnershipChallenge, OwnershipProof, ProofKind,
		StakeValidation, ValidationStats, ValidationStatus, FRAUD_BLOCK_THRESHOLD,
	},
	valuenet::ValueNetwork,
};

#[derive(Clone, Debug, Deserialize)]
pub struct PootConfig {
	/// Seconds a challenge stays answerable.
	#[serde(default = "default_challenge_validity")]
	pub challenge_validity_secs: u64,
	/// Seconds a valid proof is cached for reuse.
	#[serde(default = "default_proof_cache")]
	pub proof_cache_secs: u64,
	#[serde(default = "default_min_stake")]
	pub min_stake: f64,
	/// Challenge issuances allowed per node per rolling hour.
	#[serde(default = "default_max_attempts")]
	pub max_attempts_per_hour: usize,
	/// Random payload bytes per difficulty step.
	#[serde(default = "default_challenge_bytes")]
	pub challenge_complexity_bytes: usize,
	/// Hours of history the fraud features look back over.
	#[serde(default = "default_fraud_window")]
	pub fraud_window_hours: u32,
}

impl Default for PootConfig {
	fn default() -> Self {
		Self {
			challenge_validity_secs: default_challenge_validity(),
			proof_cache_secs: default_proof_cache(),
			min_stake: default_min_stake(),
			max_attempts_per_hour: default_max_attempts(),
			challenge_complexity_bytes: default_challenge_bytes(),
			fraud_window_hours: default_fraud_window(),
		}
	}
}

const fn default_challenge_validity() -> u64 {
	15 * 60
}

const fn default_proof_cache() -> u64 {
	60 * 60
}

const fn default_min_stake() -> f64 {
	100.0
}

const fn default_max_attempts() -> usize {
	3
}

const fn default_challenge_bytes() -> usize {
	32
}

const fn default_fraud_window() -> u32 {
	24
}

/// Prune `attempts` to the rolling window and report whether one more
/// attempt would exceed `max`.
fn rate_limited(
	attempts: &mut Vec<DateTime<Utc>>,
	now: DateTime<Utc>,
	window: ChronoDuration,
	max: usize,
) -> bool {
	attempts.retain(|t| now.signed_duration_since(*t) < window);
	attempts.len() >= max
}

pub struct PootValidator {
	store: Store,
	value_network: Arc<dyn ValueNetwork>,
	config: PootConfig,
	attempts: HashMap<NodeId, Vec<DateTime<Utc>>>,
	stats: HashMap<NodeId, ValidationStats>,
}

impl PootValidator {
	pub fn new(store: Store, value_network: Arc<dyn ValueNetwork>, config: PootConfig) -> Self {
		Self { store, value_network, config, attempts: HashMap::new(), stats: HashMap::new() }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store.collection(collections::POOT_CHALLENGES).create_index(&["node_id"], false).await?;
		self.store.collection(collections::POOT_CHALLENGES).create_index(&["expires_at"], false).await?;
		self.store.collection(collections::POOT_PROOFS).create_index(&["node_id", "submitted_at"], false).await?;
		self.store.collection(collections::FRAUD_EVENTS).create_index(&["node_id"], false).await?;
		Ok(())
	}

	async fn load(&mut self) -> Result<()> {
		let stats: Vec<ValidationStats> = self
			.store
			.collection(collections::NODE_VALIDATION_STATS)
			.find(&Filter::new(), &[], None)
			.await?;
		self.stats = stats.into_iter().map(|s| (s.node_id.clone(), s)).collect();
		Ok(())
	}

	async fn generate_challenge(
		&mut self,
		node_id: NodeId,
		proof_type: ProofKind,
		difficulty: u8,
	) -> Result<OwnershipChallenge> {
		let now = Utc::now();
		let window = ChronoDuration::hours(1);
		let attempts = self.attempts.entry(node_id.clone()).or_default();
		if rate_limited(attempts, now, window, self.config.max_attempts_per_hour) {
			return Err(Error::RateLimited(format!(
				"{} ownership challenges per hour",
				self.config.max_attempts_per_hour
			)));
		}
		attempts.push(now);

		let difficulty = difficulty.max(1);
		let challenge = OwnershipChallenge {
			challenge_id: util::fresh_id(),
			node_id,
			proof_type,
			challenge_data: crypto::random_payload(
				self.config.challenge_complexity_bytes * difficulty as usize,
			),
			nonce: crypto::random_payload(16),
			difficulty,
			issued_at: now,
			expires_at: now + ChronoDuration::seconds(self.config.challenge_validity_secs as i64),
		};
		self.store
			.collection(collections::POOT_CHALLENGES)
			.upsert(&challenge.challenge_id, &challenge)
			.await?;
		log::info!("issued {} challenge {} to {}", challenge.proof_type.as_str(), challenge.challenge_id, challenge.node_id);
		Ok(challenge)
	}

	async fn fraud_signals(&self, proof: &OwnershipProof) -> Result<FraudSignals> {
		let hour_ago = (Utc::now() - ChronoDuration::hours(1)).timestamp_micros();
		let recent = self
			.store
			.collection(collections::POOT_PROOFS)
			.count(&Filter::new().eq("node_id", proof.node_id.as_str()).gte("submitted_at", hour_ago))
			.await?;
		let stats = self.stats.get(&proof.node_id);
		Ok(FraudSignals {
			recent_submissions: recent as u64 + 1,
			exact_minimum_stake: (proof.stake_amount - self.config.min_stake).abs() < f64::EPSILON,
			success_rate: stats.filter(|s| s.total_attempts > 0).map(|s| s.success_rate),
			prior_fraud_events: stats.map(|s| s.fraud_events).unwrap_or(0),
		})
	}

	async fn record_fraud_event(&self, node_id: &str, fraud_type: &str, details: Value) -> Result<()> {
		let event = FraudEvent {
			event_id: util::fresh_id(),
			node_id: node_id.to_string(),
			fraud_type: fraud_type.to_string(),
			details,
			resolved: false,
			resolved_by: None,
			resolution_notes: None,
			detected_at: Utc::now(),
		};
		self.store.collection(collections::FRAUD_EVENTS).upsert(&event.event_id, &event).await?;
		log::warn!("fraud event for {}: {}", node_id, fraud_type);
		Ok(())
	}

	async fn record_outcome(&mut self, node_id: &str, outcome: ValidationStatus) -> Result<()> {
		let stats = self
			.stats
			.entry(node_id.to_string())
			.or_insert_with(|| ValidationStats::new(node_id.to_string()));
		stats.record(outcome, Utc::now());
		let snapshot = stats.clone();
		self.store
			.collection(collections::NODE_VALIDATION_STATS)
			.upsert(node_id, &snapshot)
			.await?;
		Ok(())
	}

	fn cache_key(node_id: &str, proof_type: ProofKind) -> String {
		format!("poot_proof:{}:{}", node_id, proof_type.as_str())
	}

	/// Full proof pipeline: challenge lookup and expiry, signature check,
	/// stake floor, fraud scoring, then the exact stake comparison against
	/// the value network.
	async fn submit_proof(&mut self, mut proof: OwnershipProof) -> Result<OwnershipProof> {
		let challenges = self.store.collection(collections::POOT_CHALLENGES);
		let challenge: OwnershipChallenge = challenges
			.get(&proof.challenge_id)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown challenge {}", proof.challenge_id)))?;
		if challenge.node_id != proof.node_id {
			self.record_fraud_event(&proof.node_id, "challenge_hijack", json!({ "challenge_id": proof.challenge_id }))
				.await?;
			return self.finish(proof, ValidationStatus::ChallengeFailed).await;
		}
		let now = Utc::now();
		if challenge.is_expired(now) {
			return self.finish(proof, ValidationStatus::Expired).await;
		}
		if !crypto::verify_ownership_signature(
			&challenge.challenge_data,
			&challenge.nonce,
			&proof.node_id,
			proof.stake_amount,
			&proof.signature,
		) {
			return self.finish(proof, ValidationStatus::ChallengeFailed).await;
		}
		if proof.stake_amount < self.config.min_stake {
			return self.finish(proof, ValidationStatus::InsufficientStake).await;
		}

		let signals = self.fraud_signals(&proof).await?;
		proof.fraud_score = fraud_score(&signals);
		if proof.fraud_score >= FRAUD_BLOCK_THRESHOLD {
			self.record_fraud_event(
				&proof.node_id,
				"high_fraud_score",
				json!({ "score": proof.fraud_score, "proof_id": proof.proof_id }),
			)
			.await?;
			return self.finish(proof, ValidationStatus::FraudDetected).await;
		}

		let balance = self
			.value_network
			.account_balance(&proof.stake_address)
			.await
			.map_err(|e| Error::ValueNetwork(e.to_string()))?;
		let outcome = if !balance.active || balance.usdt < proof.stake_amount {
			self.record_fraud_event(
				&proof.node_id,
				"stake_underreported",
				json!({ "claimed": proof.stake_amount, "actual": balance.usdt }),
			)
			.await?;
			ValidationStatus::InsufficientStake
		} else {
			ValidationStatus::Valid
		};

		// challenges are single use
		challenges.delete(&proof.challenge_id).await?;
		self.finish(proof, outcome).await
	}

	async fn finish(
		&mut self,
		mut proof: OwnershipProof,
		outcome: ValidationStatus,
	) -> Result<OwnershipProof> {
		proof.validation_status = outcome;
		proof.validated_at = Some(Utc::now());
		self.store.collection(collections::POOT_PROOFS).upsert(&proof.proof_id, &proof).await?;
		self.record_outcome(&proof.node_id.clone(), outcome).await?;
		if outcome == ValidationStatus::Valid {
			self.store
				.cache_set(
					&Self::cache_key(&proof.node_id, proof.proof_type),
					serde_json::to_value(&proof)?,
					Duration::from_secs(self.config.proof_cache_secs),
				)
				.await;
		}
		log::info!("proof {} for {} -> {:?}", proof.proof_id, proof.node_id, outcome);
		Ok(proof)
	}

	async fn validate_stake(
		&mut self,
		node_id: NodeId,
		stake_address: String,
		claimed: f64,
	) -> Result<StakeValidation> {
		let balance = self
			.value_network
			.account_balance(&stake_address)
			.await
			.map_err(|e| Error::ValueNetwork(e.to_string()))?;
		let valid = balance.active && balance.usdt >= claimed;
		if !valid {
			self.record_fraud_event(
				&node_id,
				"stake_underreported",
				json!({ "claimed": claimed, "actual": balance.usdt }),
			)
			.await?;
		}
		let validation = StakeValidation {
			validation_id: util::fresh_id(),
			node_id,
			stake_address,
			claimed_amount: claimed,
			actual_amount: balance.usdt,
			valid,
			validated_at: Utc::now(),
		};
		self.store
			.collection(collections::STAKE_VALIDATIONS)
			.upsert(&validation.validation_id, &validation)
			.await?;
		Ok(validation)
	}

	async fn cleanup_expired(&self) -> Result<()> {
		let now = Utc::now().timestamp_micros();
		let removed = self
			.store
			.collection(collections::POOT_CHALLENGES)
			.delete_many(&Filter::new().lt("expires_at", now))
			.await?;
		if removed > 0 {
			log::debug!("swept {} expired ownership challenges", removed);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for PootValidator {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create poot indexes: {}", e);
		}
		if let Err(e) = self.load().await {
			log::error!("failed to load validation stats: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr, Duration::from_secs(60), || CleanupChallenges);
	}
}

struct CleanupChallenges;

impl Message for CleanupChallenges {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<CleanupChallenges> for PootValidator {
	async fn handle(&mut self, _: CleanupChallenges, _: &mut Context<Self>) {
		if let Err(e) = self.cleanup_expired().await {
			log::error!("challenge cleanup failed: {}", e);
		}
	}
}

pub struct GenerateOwnershipChallenge {
	pub node_id: NodeId,
	pub proof_type: ProofKind,
	pub difficulty: u8,
}

impl Message for GenerateOwnershipChallenge {
	type Result = Result<OwnershipChallenge>;
}

#[async_trait::async_trait]
impl Handler<GenerateOwnershipChallenge> for PootValidator {
	async fn handle(
		&mut self,
		msg: GenerateOwnershipChallenge,
		_: &mut Context<Self>,
	) -> Result<OwnershipChallenge> {
		self.generate_challenge(msg.node_id, msg.proof_type, msg.difficulty).await
	}
}

pub struct SubmitOwnershipProof {
	pub challenge_id: String,
	pub node_id: NodeId,
	pub proof_type: ProofKind,
	pub stake_amount: f64,
	pub stake_address: String,
	pub signature: String,
	pub proof_data: Value,
}

impl Message for SubmitOwnershipProof {
	type Result = Result<OwnershipProof>;
}

#[async_trait::async_trait]
impl Handler<SubmitOwnershipProof> for PootValidator {
	async fn handle(&mut self, msg: SubmitOwnershipProof, _: &mut Context<Self>) -> Result<OwnershipProof> {
		let proof = OwnershipProof {
			proof_id: util::fresh_id(),
			challenge_id: msg.challenge_id,
			node_id: msg.node_id,
			proof_type: msg.proof_type,
			stake_amount: msg.stake_amount,
			stake_address: msg.stake_address,
			signature: msg.signature,
			proof_data: msg.proof_data,
			validation_status: ValidationStatus::Pending,
			fraud_score: 0.0,
			submitted_at: Utc::now(),
			validated_at: None,
		};
		self.submit_proof(proof).await
	}
}

pub struct ValidateStake {
	pub node_id: NodeId,
	pub stake_address: String,
	pub claimed_amount: f64,
}

impl Message for ValidateStake {
	type Result = Result<StakeValidation>;
}

#[async_trait::async_trait]
impl Handler<ValidateStake> for PootValidator {
	async fn handle(&mut self, msg: ValidateStake, _: &mut Context<Self>) -> Result<StakeValidation> {
		self.validate_stake(msg.node_id, msg.stake_address, msg.claimed_amount).await
	}
}

pub struct GetCachedProof {
	pub node_id: NodeId,
	pub proof_type: ProofKind,
}

impl Message for GetCachedProof {
	type Result = Result<Option<OwnershipProof>>;
}

#[async_trait::async_trait]
impl Handler<GetCachedProof> for PootValidator {
	async fn handle(&mut self, msg: GetCachedProof, _: &mut Context<Self>) -> Result<Option<OwnershipProof>> {
		match self.store.cache_get(&Self::cache_key(&msg.node_id, msg.proof_type)).await {
			Some(value) => Ok(Some(serde_json::from_value(value)?)),
			None => Ok(None),
		}
	}
}

pub struct GetValidationStats(pub NodeId);

impl Message for GetValidationStats {
	type Result = Result<Option<ValidationStats>>;
}

#[async_trait::async_trait]
impl Handler<GetValidationStats> for PootValidator {
	async fn handle(&mut self, msg: GetValidationStats, _: &mut Context<Self>) -> Result<Option<ValidationStats>> {
		Ok(self.stats.get(&msg.0).cloned())
	}
}

pub struct ListFraudEvents {
	pub node_id: Option<NodeId>,
	pub unresolved_only: bool,
}

impl Message for ListFraudEvents {
	type Result = Result<Vec<FraudEvent>>;
}

#[async_trait::async_trait]
impl Handler<ListFraudEvents> for PootValidator {
	async fn handle(&mut self, msg: ListFraudEvents, _: &mut Context<Self>) -> Result<Vec<FraudEvent>> {
		let mut filter = Filter::new();
		if let Some(node_id) = msg.node_id {
			filter = filter.eq("node_id", node_id);
		}
		if msg.unresolved_only {
			filter = filter.eq("resolved", false);
		}
		let events = self
			.store
			.collection(collections::FRAUD_EVENTS)
			.find(&filter, &[Sort::desc("detected_at")], Some(100))
			.await?;
		Ok(events)
	}
}

pub struct ResolveFraudEvent {
	pub event_id: String,
	pub resolver: NodeId,
	pub notes: String,
}

impl Message for ResolveFraudEvent {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<ResolveFraudEvent> for PootValidator {
	async fn handle(&mut self, msg: ResolveFraudEvent, _: &mut Context<Self>) -> Result<bool> {
		let events = self.store.collection(collections::FRAUD_EVENTS);
		let mut event: FraudEvent = match events.get(&msg.event_id).await? {
			Some(event) => event,
			None => return Ok(false),
		};
		if event.resolved {
			return Ok(false);
		}
		event.resolved = true;
		event.resolved_by = Some(msg.resolver);
		event.resolution_notes = Some(msg.notes);
		events.upsert(&event.event_id, &event).await?;
		Ok(true)
	}
}

pub struct GetSystemStats;

impl Message for GetSystemStats {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<GetSystemStats> for PootValidator {
	async fn handle(&mut self, _: GetSystemStats, _: &mut Context<Self>) -> Result<Value> {
		let proofs = self.store.collection(collections::POOT_PROOFS);
		let total = proofs.count(&Filter::new()).await?;
		let valid = proofs.count(&Filter::new().eq("validation_status", "valid")).await?;
		let fraud = proofs.count(&Filter::new().eq("validation_status", "fraud_detected")).await?;
		let open_challenges =
			self.store.collection(collections::POOT_CHALLENGES).count(&Filter::new()).await?;
		let unresolved_fraud = self
			.store
			.collection(collections::FRAUD_EVENTS)
			.count(&Filter::new().eq("resolved", false))
			.await?;
		Ok(json!({
			"proofs_total": total,
			"proofs_valid": valid,
			"proofs_fraud_detected": fraud,
			"open_challenges": open_challenges,
			"unresolved_fraud_events": unresolved_fraud,
			"nodes_tracked": self.stats.len(),
		}))
	}
}

#[async_trait::async_trait]
impl Handler<Die> for PootValidator {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn three_challenges_per_rolling_hour() {
		let window = ChronoDuration::hours(1);
		let t0 = Utc::now();
		let mut attempts = Vec::new();
		for i in 0..3 {
			let now = t0 + ChronoDuration::seconds(i * 10);
			assert!(!rate_limited(&mut attempts, now, window, 3));
			attempts.push(now);
		}
		// fourth within the hour is rejected
		assert!(rate_limited(&mut attempts, t0 + ChronoDuration::seconds(40), window, 3));
		// one second past the window, the earliest attempt ages out
		assert!(!rate_limited(&mut attempts, t0 + ChronoDuration::seconds(3601), window, 3));
	}

	#[test]
	fn pruning_keeps_only_the_window() {
		let window = ChronoDuration::hours(1);
		let t0 = Utc::now();
		let mut attempts = vec![
			t0 - ChronoDuration::hours(2),
			t0 - ChronoDuration::minutes(30),
			t0 - ChronoDuration::minutes(5),
		];
		rate_limited(&mut attempts, t0, window, 3);
		assert_eq!(attempts.len(), 2);
	}
}
