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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use coordinator_common::NodeId;

/// What the challenged node must prove it controls on the value network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
	StakeProof,
	BalanceProof,
	DelegationProof,
	CustodyProof,
	LiquidityProof,
}

impl ProofKind {
	pub fn as_str(self) -> &'static str {
		match self {
			ProofKind::StakeProof => "stake_proof",
			ProofKind::BalanceProof => "balance_proof",
			ProofKind::DelegationProof => "delegation_proof",
			ProofKind::CustodyProof => "custody_proof",
			ProofKind::LiquidityProof => "liquidity_proof",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
	Pending,
	Valid,
	Invalid,
	Expired,
	FraudDetected,
	InsufficientStake,
	ChallengeFailed,
}

/// A pending ownership challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnershipChallenge {
	pub challenge_id: String,
	pub node_id: NodeId,
	pub proof_type: ProofKind,
	/// Random payload, hex-encoded; length scales with difficulty.
	pub challenge_data: String,
	pub nonce: String,
	pub difficulty: u8,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub issued_at: DateTime<Utc>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub expires_at: DateTime<Utc>,
}

impl OwnershipChallenge {
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}
}

/// A submitted response to an ownership challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnershipProof {
	pub proof_id: String,
	pub challenge_id: String,
	pub node_id: NodeId,
	pub proof_type: ProofKind,
	pub stake_amount: f64,
	pub stake_address: String,
	pub signature: String,
	#[serde(default)]
	pub proof_data: Value,
	pub validation_status: ValidationStatus,
	pub fraud_score: f64,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub submitted_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeValidation {
	pub validation_id: String,
	pub node_id: NodeId,
	pub stake_address: String,
	pub claimed_amount: f64,
	pub actual_amount: f64,
	pub valid: bool,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub validated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FraudEvent {
	pub event_id: String,
	pub node_id: NodeId,
	pub fraud_type: String,
	#[serde(default)]
	pub details: Value,
	pub resolved: bool,
	pub resolved_by: Option<String>,
	pub resolution_notes: Option<String>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub detected_at: DateTime<Utc>,
}

/// Rolling validation statistics per node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationStats {
	pub node_id: NodeId,
	pub total_attempts: u64,
	pub successful: u64,
	pub failed: u64,
	pub fraud_events: u64,
	pub success_rate: f64,
	pub reputation_score: f64,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub last_validation: Option<DateTime<Utc>>,
}

impl ValidationStats {
	pub fn new(node_id: NodeId) -> Self {
		Self {
			node_id,
			total_attempts: 0,
			successful: 0,
			failed: 0,
			fraud_events: 0,
			success_rate: 0.0,
			reputation_score: 0.5,
			last_validation: None,
		}
	}

	/// Fold in one validation outcome and refresh the derived scores.
	pub fn record(&mut self, outcome: ValidationStatus, now: DateTime<Utc>) {
		self.total_attempts += 1;
		match outcome {
			ValidationStatus::Valid => self.successful += 1,
			ValidationStatus::FraudDetected => {
				self.failed += 1;
				self.fraud_events += 1;
			}
			_ => self.failed += 1,
		}
		self.success_rate = self.successful as f64 / self.total_attempts as f64;
		// reputation leans on success history, pulled down hard by fraud
		self.reputation_score =
			(self.success_rate - 0.2 * self.fraud_events as f64).clamp(0.0, 1.0);
		self.last_validation = Some(now);
	}
}

/// Inputs to the deterministic fraud score.
#[derive(Clone, Copy, Debug, Default)]
pub struct FraudSignals {
	/// Proofs submitted in the trailing hour, this one included.
	pub recent_submissions: u64,
	/// The claimed stake is exactly the network minimum.
	pub exact_minimum_stake: bool,
	/// Historical stats, when the node has any.
	pub success_rate: Option<f64>,
	pub prior_fraud_events: u64,
}

/// Composite fraud probability in `[0, 1]`. Scores at or above 0.8 reject
/// the proof as `fraud_detected`.
pub fn fraud_score(signals: &FraudSignals) -> f64 {
	let mut score: f64 = 0.0;
	match signals.success_rate {
		// good history earns the benefit of the doubt
		Some(rate) if rate > 0.9 => score -= 0.2,
		Some(rate) if rate < 0.5 => score += 0.3,
		Some(_) => {}
		// unknown nodes get extra scrutiny
		None => score += 0.1,
	}
	if signals.prior_fraud_events > 0 {
		score += 0.4;
	}
	if signals.recent_submissions > 5 {
		score += 0.3;
	}
	if signals.exact_minimum_stake {
		score += 0.1;
	}
	score.clamp(0.0, 1.0)
}

pub const FRAUD_BLOCK_THRESHOLD: f64 = 0.8;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fraud_score_is_deterministic_and_bounded() {
		let signals = FraudSignals {
			recent_submissions: 9,
			exact_minimum_stake: true,
			success_rate: Some(0.1),
			prior_fraud_events: 3,
		};
		let score = fraud_score(&signals);
		assert_eq!(score, fraud_score(&signals));
		assert!(score <= 1.0);
		assert!(score >= FRAUD_BLOCK_THRESHOLD);
	}

	#[test]
	fn clean_history_lowers_the_score() {
		let trusted = FraudSignals {
			recent_submissions: 1,
			exact_minimum_stake: false,
			success_rate: Some(0.95),
			prior_fraud_events: 0,
		};
		assert_eq!(fraud_score(&trusted), 0.0);

		let unknown = FraudSignals { success_rate: None, ..trusted };
		assert!(fraud_score(&unknown) > 0.0);
	}

	#[test]
	fn stats_fold_outcomes_into_rates() {
		let mut stats = ValidationStats::new("n1".into());
		let now = Utc::now();
		stats.record(ValidationStatus::Valid, now);
		stats.record(ValidationStatus::Valid, now);
		stats.record(ValidationStatus::Invalid, now);
		assert_eq!(stats.total_attempts, 3);
		assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);

		stats.record(ValidationStatus::FraudDetected, now);
		assert_eq!(stats.fraud_events, 1);
		assert!(stats.reputation_score < stats.success_rate);
	}
}
