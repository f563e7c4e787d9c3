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
use serde_json::Value;

use coordinator_common::{Capability, NodeId, Role};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
	Pending,
	ChallengeIssued,
	ChallengeVerified,
	StakeVerified,
	Approved,
	Rejected,
	Expired,
	Suspended,
}

impl RegistrationStatus {
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			RegistrationStatus::Approved | RegistrationStatus::Rejected | RegistrationStatus::Expired
		)
	}
}

/// The four onboarding challenges, each contributing its share of the
/// verification score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
	OwnershipSignature,
	CapabilityProof,
	NetworkReachability,
	StorageProof,
}

impl ChallengeKind {
	pub fn score_share(self) -> f64 {
		match self {
			ChallengeKind::OwnershipSignature => 0.3,
			ChallengeKind::CapabilityProof => 0.3,
			ChallengeKind::NetworkReachability => 0.2,
			ChallengeKind::StorageProof => 0.2,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
	Issued,
	Completed,
	Failed,
	Expired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationChallenge {
	pub challenge_id: String,
	pub registration_id: String,
	pub node_id: NodeId,
	pub challenge_type: ChallengeKind,
	#[serde(default)]
	pub payload: Value,
	pub status: ChallengeStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub issued_at: DateTime<Utc>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub expires_at: DateTime<Utc>,
}

/// A candidate's submission, as validated by [`validate_submission`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationRequest {
	pub node_id: NodeId,
	pub onion_address: String,
	pub port: u16,
	pub role: Role,
	#[serde(default)]
	pub capabilities: BTreeSet<Capability>,
	pub stake_amount: f64,
	pub stake_address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRegistration {
	pub registration_id: String,
	pub node_id: NodeId,
	pub onion_address: String,
	pub port: u16,
	pub role: Role,
	#[serde(default)]
	pub capabilities: BTreeSet<Capability>,
	pub stake_amount: f64,
	pub stake_address: String,
	pub status: RegistrationStatus,
	pub verification_score: f64,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub submitted_at: DateTime<Utc>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub updated_at: DateTime<Utc>,
	pub approved_by: Option<String>,
	pub rejection_reason: Option<String>,
}

/// Verification score required before approval. Compared with a small
/// tolerance; the challenge shares are decimal fractions that do not sum
/// exactly in binary.
pub const APPROVAL_SCORE: f64 = 0.8;

impl NodeRegistration {
	/// Approval requires every challenge verified (score ≥ 0.8) and the
	/// stake confirmed on the value network.
	pub fn approvable(&self) -> bool {
		self.status == RegistrationStatus::StakeVerified
			&& self.verification_score >= APPROVAL_SCORE - 1e-9
	}
}

/// Shape-check a submission against the admission rules.
pub fn validate_submission(req: &RegistrationRequest, min_stake: f64) -> Result<()> {
	if req.node_id.is_empty() {
		return Err(Error::validation("registration requires a node id"));
	}
	if !req.onion_address.ends_with(".onion") {
		return Err(Error::validation(format!(
			"overlay address `{}` must end with .onion",
			req.onion_address
		)));
	}
	if req.port < 1024 {
		return Err(Error::validation(format!("port {} outside [1024, 65535]", req.port)));
	}
	if req.stake_amount < min_stake {
		return Err(Error::validation(format!(
			"stake {} below the {} minimum",
			req.stake_amount, min_stake
		)));
	}
	if req.stake_address.is_empty() {
		return Err(Error::validation("registration requires a stake address"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request() -> RegistrationRequest {
		RegistrationRequest {
			node_id: "candidate".into(),
			onion_address: "abcdefabcdefabcd.onion".into(),
			port: 5050,
			role: Role::Worker,
			capabilities: BTreeSet::new(),
			stake_amount: 250.0,
			stake_address: "TXYZabc".into(),
		}
	}

	#[test]
	fn valid_submission_passes() {
		assert!(validate_submission(&request(), 100.0).is_ok());
	}

	#[test]
	fn submission_shape_is_enforced() {
		let mut bad = request();
		bad.onion_address = "example.com".into();
		assert!(validate_submission(&bad, 100.0).is_err());

		let mut bad = request();
		bad.port = 80;
		assert!(validate_submission(&bad, 100.0).is_err());

		let mut bad = request();
		bad.stake_amount = 50.0;
		assert!(validate_submission(&bad, 100.0).is_err());
	}

	#[test]
	fn challenge_shares_sum_to_one() {
		let total: f64 = [
			ChallengeKind::OwnershipSignature,
			ChallengeKind::CapabilityProof,
			ChallengeKind::NetworkReachability,
			ChallengeKind::StorageProof,
		]
		.iter()
		.map(|c| c.score_share())
		.sum();
		assert!((total - 1.0).abs() < 1e-9);
	}

	#[test]
	fn approval_gate_needs_score_and_stake() {
		let mut reg = NodeRegistration {
			registration_id: "r1".into(),
			node_id: "n1".into(),
			onion_address: "x.onion".into(),
			port: 5050,
			role: Role::Worker,
			capabilities: BTreeSet::new(),
			stake_amount: 100.0,
			stake_address: "T1".into(),
			status: RegistrationStatus::ChallengeVerified,
			verification_score: 1.0,
			submitted_at: Utc::now(),
			updated_at: Utc::now(),
			approved_by: None,
			rejection_reason: None,
		};
		assert!(!reg.approvable());
		reg.status = RegistrationStatus::StakeVerified;
		assert!(reg.approvable());
		reg.verification_score = 0.6;
		assert!(!reg.approvable());
		// three of four challenges; the storage share is not required of
		// non-storage candidates and must still clear the gate
		reg.verification_score = 0.3 + 0.3 + 0.2;
		assert!(reg.approvable());
	}
}
