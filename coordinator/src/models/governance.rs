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

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
	ParameterChange,
	ProtocolUpgrade,
	FundAllocation,
	NodePenalty,
	NetworkPolicy,
	Emergency,
	CommunityInitiative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
	Draft,
	Discussion,
	Voting,
	Passed,
	Rejected,
	Executed,
	Expired,
	Cancelled,
}

impl ProposalStatus {
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			ProposalStatus::Rejected
				| ProposalStatus::Executed
				| ProposalStatus::Expired
				| ProposalStatus::Cancelled
		)
	}

	/// The monotone lifecycle. `Passed` is only terminal once executed;
	/// everything else listed as terminal never changes again.
	pub fn can_transition_to(self, next: ProposalStatus) -> bool {
		use ProposalStatus::*;
		match (self, next) {
			(Draft, Discussion) => true,
			(Discussion, Voting) => true,
			(Voting, Passed) | (Voting, Rejected) | (Voting, Expired) => true,
			(Passed, Executed) => true,
			(Draft, Cancelled) | (Discussion, Cancelled) => true,
			_ => false,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMethod {
	Equal,
	StakeWeighted,
	WorkWeighted,
	Hybrid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
	pub proposal_id: String,
	pub proposer_node_id: NodeId,
	pub title: String,
	pub description: String,
	pub proposal_type: ProposalKind,
	pub weight_method: WeightMethod,
	#[serde(default)]
	pub parameters: Value,
	pub status: ProposalStatus,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub discussion_start: Option<DateTime<Utc>>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub voting_start: Option<DateTime<Utc>>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub voting_end: Option<DateTime<Utc>>,
	#[serde(default, with = "chrono::serde::ts_microseconds_option")]
	pub executed_at: Option<DateTime<Utc>>,
	pub execution_hash: Option<String>,
}

impl Proposal {
	pub fn in_voting_window(&self, now: DateTime<Utc>) -> bool {
		match (self.status, self.voting_start, self.voting_end) {
			(ProposalStatus::Voting, Some(start), Some(end)) => now >= start && now < end,
			_ => false,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
	Yes,
	No,
	Abstain,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
	pub vote_id: String,
	pub proposal_id: String,
	pub voter_node_id: NodeId,
	pub choice: VoteChoice,
	pub weight: f64,
	/// Set when this vote is cast on behalf of a delegator.
	pub delegate_from: Option<NodeId>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub cast_at: DateTime<Utc>,
}

impl Vote {
	/// Key for the direct vote of a voter; delegated votes key by the
	/// delegator so the delegator's voice is spent exactly once.
	pub fn key(&self) -> String {
		match &self.delegate_from {
			Some(delegator) => format!("{}:{}", self.proposal_id, delegator),
			None => format!("{}:{}", self.proposal_id, self.voter_node_id),
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delegation {
	pub delegation_id: String,
	pub delegator_node_id: NodeId,
	pub delegate_node_id: NodeId,
	/// `None` delegates every proposal kind.
	pub scope: Option<ProposalKind>,
	pub active: bool,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub expires_at: DateTime<Utc>,
}

impl Delegation {
	pub fn covers(&self, kind: ProposalKind, at: DateTime<Utc>) -> bool {
		self.active && at < self.expires_at && self.scope.map_or(true, |s| s == kind)
	}

	pub fn overlaps(&self, other_scope: Option<ProposalKind>) -> bool {
		match (self.scope, other_scope) {
			(None, _) | (_, None) => true,
			(Some(a), Some(b)) => a == b,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyResult {
	Pending,
	Passed,
	Rejected,
}

/// Cached reducer over the votes of one proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteTally {
	pub proposal_id: String,
	pub yes_weight: f64,
	pub no_weight: f64,
	pub abstain_weight: f64,
	pub total_weight_cast: f64,
	pub total_eligible_weight: f64,
	pub quorum_met: bool,
	pub result: TallyResult,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub updated_at: DateTime<Utc>,
}

/// Reduce votes to a tally. Quorum compares the total weight cast against
/// `quorum_fraction` of the eligible weight; ties reject.
pub fn compute_tally(
	proposal_id: &str,
	votes: &[Vote],
	total_eligible_weight: f64,
	quorum_fraction: f64,
) -> VoteTally {
	let mut yes = 0.0;
	let mut no = 0.0;
	let mut abstain = 0.0;
	for vote in votes {
		match vote.choice {
			VoteChoice::Yes => yes += vote.weight,
			VoteChoice::No => no += vote.weight,
			VoteChoice::Abstain => abstain += vote.weight,
		}
	}
	let cast = yes + no + abstain;
	let quorum_met = cast >= quorum_fraction * total_eligible_weight && cast > 0.0;
	let result = if !quorum_met {
		TallyResult::Pending
	} else if yes > no {
		TallyResult::Passed
	} else {
		TallyResult::Rejected
	};
	VoteTally {
		proposal_id: proposal_id.to_string(),
		yes_weight: yes,
		no_weight: no,
		abstain_weight: abstain,
		total_weight_cast: cast,
		total_eligible_weight,
		quorum_met,
		result,
		updated_at: Utc::now(),
	}
}

/// A discussion comment attached to a proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comment {
	pub comment_id: String,
	pub proposal_id: String,
	pub commenter_node_id: NodeId,
	pub content: String,
	pub parent_comment_id: Option<String>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vote(voter: &str, choice: VoteChoice, weight: f64) -> Vote {
		Vote {
			vote_id: format!("v-{}", voter),
			proposal_id: "p1".into(),
			voter_node_id: voter.into(),
			choice,
			weight,
			delegate_from: None,
			cast_at: Utc::now(),
		}
	}

	#[test]
	fn lifecycle_never_moves_backward() {
		use ProposalStatus::*;
		assert!(Draft.can_transition_to(Discussion));
		assert!(Discussion.can_transition_to(Voting));
		assert!(Voting.can_transition_to(Passed));
		assert!(Passed.can_transition_to(Executed));
		assert!(!Voting.can_transition_to(Discussion));
		assert!(!Discussion.can_transition_to(Draft));
		for terminal in [Rejected, Executed, Expired, Cancelled] {
			assert!(terminal.is_terminal());
			for next in [Draft, Discussion, Voting, Passed, Rejected, Executed, Expired, Cancelled] {
				assert!(!terminal.can_transition_to(next));
			}
		}
	}

	#[test]
	fn cancellable_only_before_voting() {
		use ProposalStatus::*;
		assert!(Draft.can_transition_to(Cancelled));
		assert!(Discussion.can_transition_to(Cancelled));
		assert!(!Voting.can_transition_to(Cancelled));
	}

	#[test]
	fn three_equal_voters_pass_two_to_one() {
		let votes = vec![
			vote("a", VoteChoice::Yes, 1.0),
			vote("b", VoteChoice::Yes, 1.0),
			vote("c", VoteChoice::No, 1.0),
		];
		let tally = compute_tally("p1", &votes, 3.0, 0.33);
		assert!(tally.quorum_met);
		assert_eq!(tally.result, TallyResult::Passed);
		assert_eq!(tally.yes_weight, 2.0);
		assert_eq!(tally.no_weight, 1.0);
	}

	#[test]
	fn quorum_gates_the_result() {
		let votes = vec![vote("a", VoteChoice::Yes, 1.0)];
		let tally = compute_tally("p1", &votes, 10.0, 0.33);
		assert!(!tally.quorum_met);
		assert_eq!(tally.result, TallyResult::Pending);
	}

	#[test]
	fn ties_reject() {
		let votes = vec![vote("a", VoteChoice::Yes, 2.0), vote("b", VoteChoice::No, 2.0)];
		let tally = compute_tally("p1", &votes, 4.0, 0.33);
		assert!(tally.quorum_met);
		assert_eq!(tally.result, TallyResult::Rejected);
	}

	#[test]
	fn abstentions_count_toward_quorum_not_result() {
		let votes = vec![
			vote("a", VoteChoice::Abstain, 2.0),
			vote("b", VoteChoice::Abstain, 2.0),
			vote("c", VoteChoice::Yes, 1.0),
		];
		let tally = compute_tally("p1", &votes, 10.0, 0.33);
		assert!(tally.quorum_met);
		assert_eq!(tally.result, TallyResult::Passed);
	}

	#[test]
	fn vote_keys_spend_each_voice_once() {
		let direct = vote("alice", VoteChoice::Yes, 1.0);
		assert_eq!(direct.key(), "p1:alice");

		// a delegated vote keys by the delegator, so alice voting through
		// bob and alice voting directly collide
		let mut delegated = vote("bob", VoteChoice::No, 1.0);
		delegated.delegate_from = Some("alice".into());
		assert_eq!(delegated.key(), "p1:alice");

		// bob's own vote is a separate voice
		let own = vote("bob", VoteChoice::No, 1.0);
		assert_eq!(own.key(), "p1:bob");
	}

	#[test]
	fn delegation_scope_and_expiry() {
		let now = Utc::now();
		let delegation = Delegation {
			delegation_id: "d1".into(),
			delegator_node_id: "a".into(),
			delegate_node_id: "b".into(),
			scope: Some(ProposalKind::ParameterChange),
			active: true,
			created_at: now,
			expires_at: now + chrono::Duration::days(30),
		};
		assert!(delegation.covers(ProposalKind::ParameterChange, now));
		assert!(!delegation.covers(ProposalKind::Emergency, now));
		assert!(!delegation.covers(ProposalKind::ParameterChange, now + chrono::Duration::days(31)));

		let all = Delegation { scope: None, ..delegation.clone() };
		assert!(all.covers(ProposalKind::Emergency, now));
		assert!(all.overlaps(Some(ProposalKind::NodePenalty)));
		assert!(delegation.overlaps(Some(ProposalKind::ParameterChange)));
		assert!(!delegation.overlaps(Some(ProposalKind::Emergency)));
	}
}
