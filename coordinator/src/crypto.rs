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

//! Canonical-message digests for the proofs the core checks itself. Real
//! asymmetric signatures live with the external signature collaborator;
//! the core only fixes the canonical messages and compares digests.

use rand::RngCore;

use coordinator_common::util::hex_digest;

use crate::models::credits::WorkProof;

/// Canonical message of a work proof.
pub fn work_proof_message(proof: &WorkProof) -> String {
	format!("{}:{}:{}:{}", proof.node_id, proof.slot, proof.task_type.as_str(), proof.value)
}

/// A work proof's signature is the hex digest of its canonical message.
pub fn verify_work_proof(proof: &WorkProof) -> bool {
	proof.signature == hex_digest(work_proof_message(proof).as_bytes())
}

/// Sign a work proof the way producers on this node do.
pub fn sign_work_proof(proof: &mut WorkProof) {
	proof.signature = hex_digest(work_proof_message(proof).as_bytes());
}

/// Canonical message of an ownership-proof response.
pub fn ownership_message(challenge_data: &str, nonce: &str, node_id: &str, stake_amount: f64) -> String {
	format!("{}:{}:{}:{}", challenge_data, nonce, node_id, stake_amount)
}

pub fn verify_ownership_signature(
	challenge_data: &str,
	nonce: &str,
	node_id: &str,
	stake_amount: f64,
	signature: &str,
) -> bool {
	signature == hex_digest(ownership_message(challenge_data, nonce, node_id, stake_amount).as_bytes())
}

/// Canonical message a registering node must sign with its stake key.
pub fn registration_message(node_id: &str, onion_address: &str, nonce: &str) -> String {
	format!("register:{}:{}:{}", node_id, onion_address, nonce)
}

/// `len` cryptographically random bytes, hex-encoded.
pub fn random_payload(len: usize) -> String {
	let mut bytes = vec![0u8; len];
	rand::thread_rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

/// A short random token for reachability pings.
pub fn random_token() -> String {
	random_payload(16)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::models::credits::TaskKind;
	use chrono::Utc;

	fn proof() -> WorkProof {
		WorkProof {
			node_id: "n1".into(),
			pool_id: None,
			slot: 42,
			task_type: TaskKind::StorageProof,
			value: 3.0,
			signature: String::new(),
			timestamp: Utc::now(),
		}
	}

	#[test]
	fn signed_proofs_verify() {
		let mut p = proof();
		sign_work_proof(&mut p);
		assert!(verify_work_proof(&p));
	}

	#[test]
	fn tampered_proofs_fail() {
		let mut p = proof();
		sign_work_proof(&mut p);
		p.value = 30.0;
		assert!(!verify_work_proof(&p));
	}

	#[test]
	fn payloads_scale_with_difficulty() {
		let p1 = random_payload(32);
		let p2 = random_payload(64);
		assert_eq!(p1.len(), 64);
		assert_eq!(p2.len(), 128);
		assert_ne!(random_payload(32), random_payload(32));
	}

	#[test]
	fn ownership_signature_binds_the_stake() {
		let sig = hex_digest(ownership_message("data", "nonce", "n1", 100.0).as_bytes());
		assert!(verify_ownership_signature("data", "nonce", "n1", 100.0, &sig));
		assert!(!verify_ownership_signature("data", "nonce", "n1", 99.0, &sig));
	}
}
