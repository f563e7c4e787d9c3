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

//! Multi-stage onboarding for candidate peers: shape validation, four
//! verification challenges, external stake confirmation, then admission to
//! the peer directory.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use xtra::prelude::*;

use coordinator_common::{util, Capability, NodeId};
use coordinator_store::{collections, Filter, Store};

use crate::{
	actors::{spawn_ticker, Die},
	crypto,
	error::{Error, Result},
	models::{
		peer::Peer,
		registration::{
			validate_submission, ChallengeKind, ChallengeStatus, NodeRegistration,
			RegistrationChallenge, RegistrationRequest, RegistrationStatus,
		},
	},
	overlay::OverlayApi,
	valuenet::ValueNetwork,
};

use super::peers::{AddPeer, PeerDirectory};

#[derive(Clone, Debug, Deserialize)]
pub struct RegistrationConfig {
	/// Seconds a registration may stay unfinished.
	#[serde(default = "default_timeout")]
	pub timeout_secs: u64,
	/// Seconds each individual challenge stays answerable.
	#[serde(default = "default_challenge_validity")]
	pub challenge_validity_secs: u64,
	#[serde(default = "default_min_stake")]
	pub min_stake: f64,
	/// Declared capability floors.
	#[serde(default = "default_min_bandwidth")]
	pub min_bandwidth_mbps: f64,
	#[serde(default = "default_min_storage")]
	pub min_storage_gb: f64,
}

impl Default for RegistrationConfig {
	fn default() -> Self {
		Self {
			timeout_secs: default_timeout(),
			challenge_validity_secs: default_challenge_validity(),
			min_stake: default_min_stake(),
			min_bandwidth_mbps: default_min_bandwidth(),
			min_storage_gb: default_min_storage(),
		}
	}
}

const fn default_timeout() -> u64 {
	300
}

const fn default_challenge_validity() -> u64 {
	120
}

const fn default_min_stake() -> f64 {
	100.0
}

const fn default_min_bandwidth() -> f64 {
	10.0
}

const fn default_min_storage() -> f64 {
	10.0
}

pub struct RegistrationProtocol {
	store: Store,
	overlay: Arc<dyn OverlayApi>,
	value_network: Arc<dyn ValueNetwork>,
	peers: Address<PeerDirectory>,
	config: RegistrationConfig,
}

impl RegistrationProtocol {
	pub fn new(
		store: Store,
		overlay: Arc<dyn OverlayApi>,
		value_network: Arc<dyn ValueNetwork>,
		peers: Address<PeerDirectory>,
		config: RegistrationConfig,
	) -> Self {
		Self { store, overlay, value_network, peers, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store
			.collection(collections::NODE_REGISTRATIONS)
			.create_index(&["node_id"], false)
			.await?;
		self.store
			.collection(collections::NODE_REGISTRATIONS)
			.create_index(&["status"], false)
			.await?;
		self.store
			.collection(collections::REGISTRATION_CHALLENGES)
			.create_index(&["registration_id"], false)
			.await?;
		Ok(())
	}

	fn challenge_kinds(request: &RegistrationRequest) -> Vec<ChallengeKind> {
		let mut kinds = vec![
			ChallengeKind::OwnershipSignature,
			ChallengeKind::CapabilityProof,
			ChallengeKind::NetworkReachability,
		];
		if request.capabilities.contains(&Capability::Storage) {
			kinds.push(ChallengeKind::StorageProof);
		}
		kinds
	}

	async fn submit(&self, request: RegistrationRequest) -> Result<NodeRegistration> {
		validate_submission(&request, self.config.min_stake)?;
		let existing = self
			.store
			.collection(collections::NODE_REGISTRATIONS)
			.count(
				&Filter::new()
					.eq("node_id", request.node_id.as_str())
					.is_in("status", vec!["pending", "challenge_issued", "challenge_verified", "stake_verified"]),
			)
			.await?;
		if existing > 0 {
			return Err(Error::precondition(format!(
				"{} already has a registration in flight",
				request.node_id
			)));
		}

		let now = Utc::now();
		let registration = NodeRegistration {
			registration_id: util::fresh_id(),
			node_id: request.node_id.clone(),
			onion_address: request.onion_address.clone(),
			port: request.port,
			role: request.role,
			capabilities: request.capabilities.clone(),
			stake_amount: request.stake_amount,
			stake_address: request.stake_address.clone(),
			status: RegistrationStatus::ChallengeIssued,
			verification_score: 0.0,
			submitted_at: now,
			updated_at: now,
			approved_by: None,
			rejection_reason: None,
		};
		self.store
			.collection(collections::NODE_REGISTRATIONS)
			.upsert(&registration.registration_id, &registration)
			.await?;

		for kind in Self::challenge_kinds(&request) {
			let challenge = self.build_challenge(&registration, kind);
			self.store
				.collection(collections::REGISTRATION_CHALLENGES)
				.upsert(&challenge.challenge_id, &challenge)
				.await?;
		}
		log::info!("registration {} opened for {}", registration.registration_id, registration.node_id);
		Ok(registration)
	}

	fn build_challenge(&self, registration: &NodeRegistration, kind: ChallengeKind) -> RegistrationChallenge {
		let now = Utc::now();
		let payload = match kind {
			ChallengeKind::OwnershipSignature => {
				let nonce = crypto::random_token();
				json!({
					"nonce": nonce,
					"message": crypto::registration_message(
						&registration.node_id,
						&registration.onion_address,
						&nonce,
					),
				})
			}
			ChallengeKind::CapabilityProof => json!({
				"required": {
					"bandwidth_mbps": self.config.min_bandwidth_mbps,
					"storage_gb": self.config.min_storage_gb,
					"cpu_cores": 1,
				}
			}),
			ChallengeKind::NetworkReachability => json!({ "token": crypto::random_token() }),
			ChallengeKind::StorageProof => json!({ "payload": crypto::random_payload(64) }),
		};
		RegistrationChallenge {
			challenge_id: util::fresh_id(),
			registration_id: registration.registration_id.clone(),
			node_id: registration.node_id.clone(),
			challenge_type: kind,
			payload,
			status: ChallengeStatus::Issued,
			issued_at: now,
			expires_at: now + ChronoDuration::seconds(self.config.challenge_validity_secs as i64),
		}
	}

	async fn verify_response(
		&self,
		challenge: &RegistrationChallenge,
		registration: &NodeRegistration,
		response: &Value,
	) -> Result<bool> {
		let verified = match challenge.challenge_type {
			ChallengeKind::OwnershipSignature => {
				let message = challenge.payload.get("message").and_then(Value::as_str).unwrap_or("");
				let signature = response.get("signature").and_then(Value::as_str).unwrap_or("");
				!message.is_empty()
					&& signature == coordinator_common::util::hex_digest(message.as_bytes())
			}
			ChallengeKind::CapabilityProof => {
				let bandwidth =
					response.get("bandwidth_mbps").and_then(Value::as_f64).unwrap_or(0.0);
				let storage = response.get("storage_gb").and_then(Value::as_f64).unwrap_or(0.0);
				let cores = response.get("cpu_cores").and_then(Value::as_u64).unwrap_or(0);
				bandwidth >= self.config.min_bandwidth_mbps
					&& storage >= self.config.min_storage_gb
					&& cores >= 1
			}
			ChallengeKind::NetworkReachability => {
				let token = challenge.payload.get("token").and_then(Value::as_str).unwrap_or("");
				self.overlay
					.registration_ping(&registration.onion_address, registration.port, token)
					.await
					.unwrap_or(false)
			}
			ChallengeKind::StorageProof => {
				let payload = challenge.payload.get("payload").and_then(Value::as_str).unwrap_or("");
				let proof = response.get("proof_hash").and_then(Value::as_str).unwrap_or("");
				!payload.is_empty()
					&& proof == coordinator_common::util::hex_digest(payload.as_bytes())
			}
		};
		Ok(verified)
	}

	async fn respond(&self, challenge_id: String, response: Value) -> Result<bool> {
		let mut challenge: RegistrationChallenge = self
			.store
			.collection(collections::REGISTRATION_CHALLENGES)
			.get(&challenge_id)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown challenge {}", challenge_id)))?;
		if challenge.status != ChallengeStatus::Issued {
			return Err(Error::precondition("challenge already decided"));
		}
		let now = Utc::now();
		if now >= challenge.expires_at {
			challenge.status = ChallengeStatus::Expired;
			self.store
				.collection(collections::REGISTRATION_CHALLENGES)
				.upsert(&challenge.challenge_id, &challenge)
				.await?;
			return Err(Error::precondition("challenge expired"));
		}

		let mut registration: NodeRegistration = self
			.store
			.collection(collections::NODE_REGISTRATIONS)
			.get(&challenge.registration_id)
			.await?
			.ok_or_else(|| Error::validation("registration vanished"))?;

		let verified = self.verify_response(&challenge, &registration, &response).await?;
		challenge.status = if verified { ChallengeStatus::Completed } else { ChallengeStatus::Failed };
		self.store
			.collection(collections::REGISTRATION_CHALLENGES)
			.upsert(&challenge.challenge_id, &challenge)
			.await?;
		if !verified {
			log::warn!(
				"challenge {:?} failed for registration {}",
				challenge.challenge_type,
				registration.registration_id
			);
			return Ok(false);
		}

		registration.verification_score += challenge.challenge_type.score_share();
		registration.updated_at = now;

		let outstanding = self
			.store
			.collection(collections::REGISTRATION_CHALLENGES)
			.count(
				&Filter::new()
					.eq("registration_id", registration.registration_id.as_str())
					.eq("status", "issued"),
			)
			.await?;
		if outstanding == 0 {
			registration.status = RegistrationStatus::ChallengeVerified;
			self.verify_stake(&mut registration).await?;
		}
		self.store
			.collection(collections::NODE_REGISTRATIONS)
			.upsert(&registration.registration_id, &registration)
			.await?;
		Ok(true)
	}

	async fn verify_stake(&self, registration: &mut NodeRegistration) -> Result<()> {
		match self.value_network.account_balance(&registration.stake_address).await {
			Ok(balance) if balance.active && balance.usdt >= registration.stake_amount => {
				registration.status = RegistrationStatus::StakeVerified;
				log::info!("registration {} stake verified", registration.registration_id);
			}
			Ok(balance) => {
				registration.status = RegistrationStatus::Rejected;
				registration.rejection_reason = Some(format!(
					"stake {} not covered by on-chain balance {}",
					registration.stake_amount, balance.usdt
				));
			}
			Err(e) => {
				// transient adapter failure; leave for a later approval retry
				log::warn!("stake verification unavailable: {}", e);
			}
		}
		Ok(())
	}

	async fn approve(&self, registration_id: String, approver: NodeId) -> Result<NodeRegistration> {
		let mut registration: NodeRegistration = self
			.store
			.collection(collections::NODE_REGISTRATIONS)
			.get(&registration_id)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown registration {}", registration_id)))?;
		if !registration.approvable() {
			return Err(Error::precondition(format!(
				"registration {} is not approvable (status {:?}, score {})",
				registration_id, registration.status, registration.verification_score
			)));
		}
		registration.status = RegistrationStatus::Approved;
		registration.approved_by = Some(approver);
		registration.updated_at = Utc::now();
		self.store
			.collection(collections::NODE_REGISTRATIONS)
			.upsert(&registration.registration_id, &registration)
			.await?;

		let peer = Peer {
			node_id: registration.node_id.clone(),
			onion_address: registration.onion_address.clone(),
			port: registration.port,
			role: registration.role,
			capabilities: registration.capabilities.iter().copied().collect::<BTreeSet<_>>(),
			last_seen: Utc::now(),
			work_credits: 0.0,
			uptime_percentage: 0.0,
		};
		self.peers.send(AddPeer(peer)).await??;
		log::info!("registration {} approved; {} joined the directory", registration.registration_id, registration.node_id);
		Ok(registration)
	}

	async fn reject(&self, registration_id: String, reason: String, rejector: NodeId) -> Result<NodeRegistration> {
		let mut registration: NodeRegistration = self
			.store
			.collection(collections::NODE_REGISTRATIONS)
			.get(&registration_id)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown registration {}", registration_id)))?;
		if registration.status.is_terminal() {
			return Err(Error::precondition("registration already decided"));
		}
		registration.status = RegistrationStatus::Rejected;
		registration.rejection_reason = Some(reason);
		registration.approved_by = Some(rejector);
		registration.updated_at = Utc::now();
		self.store
			.collection(collections::NODE_REGISTRATIONS)
			.upsert(&registration.registration_id, &registration)
			.await?;
		Ok(registration)
	}

	async fn sweep(&self) -> Result<()> {
		let now = Utc::now();
		let cutoff = (now - ChronoDuration::seconds(self.config.timeout_secs as i64)).timestamp_micros();
		let stale: Vec<NodeRegistration> = self
			.store
			.collection(collections::NODE_REGISTRATIONS)
			.find(
				&Filter::new()
					.is_in("status", vec!["pending", "challenge_issued", "challenge_verified", "stake_verified"])
					.lt("submitted_at", cutoff),
				&[],
				None,
			)
			.await?;
		for mut registration in stale {
			registration.status = RegistrationStatus::Expired;
			registration.updated_at = now;
			self.store
				.collection(collections::NODE_REGISTRATIONS)
				.upsert(&registration.registration_id, &registration)
				.await?;
			log::info!("registration {} expired", registration.registration_id);
		}

		// completed and expired challenges are purged outright
		let purged = self
			.store
			.collection(collections::REGISTRATION_CHALLENGES)
			.delete_many(
				&Filter::new().any(vec![
					Filter::new().is_in("status", vec!["completed", "failed", "expired"]),
					Filter::new().lt("expires_at", now.timestamp_micros()),
				]),
			)
			.await?;
		if purged > 0 {
			log::debug!("purged {} finished registration challenges", purged);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for RegistrationProtocol {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create registration indexes: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr, Duration::from_secs(30), || Sweep);
	}
}

struct Sweep;

impl Message for Sweep {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Sweep> for RegistrationProtocol {
	async fn handle(&mut self, _: Sweep, _: &mut Context<Self>) {
		if let Err(e) = self.sweep().await {
			log::error!("registration sweep failed: {}", e);
		}
	}
}

pub struct SubmitRegistration(pub RegistrationRequest);

impl Message for SubmitRegistration {
	type Result = Result<NodeRegistration>;
}

#[async_trait::async_trait]
impl Handler<SubmitRegistration> for RegistrationProtocol {
	async fn handle(&mut self, msg: SubmitRegistration, _: &mut Context<Self>) -> Result<NodeRegistration> {
		self.submit(msg.0).await
	}
}

pub struct RespondToChallenge {
	pub challenge_id: String,
	pub response: Value,
}

impl Message for RespondToChallenge {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<RespondToChallenge> for RegistrationProtocol {
	async fn handle(&mut self, msg: RespondToChallenge, _: &mut Context<Self>) -> Result<bool> {
		self.respond(msg.challenge_id, msg.response).await
	}
}

pub struct ApproveRegistration {
	pub registration_id: String,
	pub approver: NodeId,
}

impl Message for ApproveRegistration {
	type Result = Result<NodeRegistration>;
}

#[async_trait::async_trait]
impl Handler<ApproveRegistration> for RegistrationProtocol {
	async fn handle(&mut self, msg: ApproveRegistration, _: &mut Context<Self>) -> Result<NodeRegistration> {
		self.approve(msg.registration_id, msg.approver).await
	}
}

pub struct RejectRegistration {
	pub registration_id: String,
	pub reason: String,
	pub rejector: NodeId,
}

impl Message for RejectRegistration {
	type Result = Result<NodeRegistration>;
}

#[async_trait::async_trait]
impl Handler<RejectRegistration> for RegistrationProtocol {
	async fn handle(&mut self, msg: RejectRegistration, _: &mut Context<Self>) -> Result<NodeRegistration> {
		self.reject(msg.registration_id, msg.reason, msg.rejector).await
	}
}

pub struct GetRegistrationStatus(pub String);

impl Message for GetRegistrationStatus {
	type Result = Result<Option<NodeRegistration>>;
}

#[async_trait::async_trait]
impl Handler<GetRegistrationStatus> for RegistrationProtocol {
	async fn handle(&mut self, msg: GetRegistrationStatus, _: &mut Context<Self>) -> Result<Option<NodeRegistration>> {
		Ok(self.store.collection(collections::NODE_REGISTRATIONS).get(&msg.0).await?)
	}
}

#[async_trait::async_trait]
impl Handler<Die> for RegistrationProtocol {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
