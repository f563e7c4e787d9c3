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

use coordinator_common::NodeId;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
	Pending,
	Processing,
	Completed,
	Failed,
	Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
	WorkCredits,
	PootRewards,
	PoolRewards,
	SessionFees,
}

/// Bounds and fee schedule for payouts.
#[derive(Clone, Copy, Debug)]
pub struct PayoutPolicy {
	pub min_amount: f64,
	pub max_amount: f64,
	pub threshold: f64,
	pub fee_percentage: f64,
	pub batch_size: usize,
	pub max_batch_amount: f64,
}

impl Default for PayoutPolicy {
	fn default() -> Self {
		Self {
			min_amount: 1.0,
			max_amount: 10_000.0,
			threshold: 10.0,
			fee_percentage: 1.0,
			batch_size: 20,
			max_batch_amount: 50_000.0,
		}
	}
}

/// Fee and net amount for an eligible payout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Eligibility {
	pub amount: f64,
	pub fee: f64,
	pub net_amount: f64,
}

/// Enforce `min ≤ amount ≤ max` and `amount ≥ threshold`, then price it.
pub fn check_eligibility(policy: &PayoutPolicy, amount: f64) -> Result<Eligibility> {
	if !amount.is_finite() || amount < policy.min_amount || amount > policy.max_amount {
		return Err(Error::validation(format!(
			"payout {} outside [{}, {}]",
			amount, policy.min_amount, policy.max_amount
		)));
	}
	if amount < policy.threshold {
		return Err(Error::precondition(format!(
			"payout {} below the {} threshold",
			amount, policy.threshold
		)));
	}
	let fee = amount * policy.fee_percentage / 100.0;
	Ok(Eligibility { amount, fee, net_amount: amount - fee })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutRequest {
	pub request_id: String,
	pub node_id: NodeId,
	pub payout_type: PayoutKind,
	pub amount: f64,
	pub fee: f64,
	pub net_amount: f64,
	pub recipient_address: String,
	pub status: PayoutStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub processed_at: Option<DateTime<Utc>>,
	pub external_tx_hash: Option<String>,
	pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutBatch {
	pub batch_id: String,
	pub request_ids: Vec<String>,
	pub total_amount: f64,
	pub status: PayoutStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub submitted_at: Option<DateTime<Utc>>,
}

/// Group contiguous pending requests into batches bounded by count and
/// total amount. A request too large for the current batch starts the next
/// one; order is preserved.
pub fn build_batches(policy: &PayoutPolicy, pending: &[PayoutRequest]) -> Vec<Vec<String>> {
	let mut batches = Vec::new();
	let mut current: Vec<String> = Vec::new();
	let mut current_total = 0.0;
	for request in pending {
		let over_count = current.len() >= policy.batch_size;
		let over_amount = current_total + request.amount > policy.max_batch_amount;
		if !current.is_empty() && (over_count || over_amount) {
			batches.push(std::mem::take(&mut current));
			current_total = 0.0;
		}
		current.push(request.request_id.clone());
		current_total += request.amount;
	}
	if !current.is_empty() {
		batches.push(current);
	}
	batches
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(id: &str, amount: f64) -> PayoutRequest {
		PayoutRequest {
			request_id: id.into(),
			node_id: "n".into(),
			payout_type: PayoutKind::WorkCredits,
			amount,
			fee: 0.0,
			net_amount: amount,
			recipient_address: "T1".into(),
			status: PayoutStatus::Pending,
			created_at: Utc::now(),
			processed_at: None,
			external_tx_hash: None,
			error: None,
		}
	}

	#[test]
	fn eligibility_enforces_bounds_and_threshold() {
		let policy = PayoutPolicy::default();
		assert!(check_eligibility(&policy, 0.5).is_err());
		assert!(check_eligibility(&policy, 20_000.0).is_err());
		assert!(check_eligibility(&policy, 5.0).is_err());

		let ok = check_eligibility(&policy, 100.0).unwrap();
		assert_eq!(ok.fee, 1.0);
		assert_eq!(ok.net_amount, 99.0);
	}

	#[test]
	fn every_created_payout_satisfies_the_bounds() {
		let policy = PayoutPolicy::default();
		for amount in [10.0, 100.0, 9_999.0, 10_000.0] {
			let e = check_eligibility(&policy, amount).unwrap();
			assert!(e.amount >= policy.min_amount && e.amount <= policy.max_amount);
			assert!(e.amount >= policy.threshold);
		}
	}

	#[test]
	fn batches_respect_count_and_amount_caps() {
		let policy = PayoutPolicy { batch_size: 2, max_batch_amount: 100.0, ..Default::default() };
		let pending = vec![
			request("a", 60.0),
			request("b", 50.0),
			request("c", 10.0),
			request("d", 10.0),
			request("e", 10.0),
		];
		let batches = build_batches(&policy, &pending);
		assert_eq!(batches, vec![vec!["a"], vec!["b", "c"], vec!["d", "e"]]);
	}

	#[test]
	fn empty_pending_produces_no_batches() {
		assert!(build_batches(&PayoutPolicy::default(), &[]).is_empty());
	}
}
