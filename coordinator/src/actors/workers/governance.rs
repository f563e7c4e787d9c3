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

//! Governance engine: proposal lifecycle, weighted voting, delegation and
//! quorum tallying. The lifecycle scheduler is the only writer of proposal
//! status; public operations request transitions, never force them.

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use xtra::prelude::*;

use coordinator_common::{time, util, NodeId};
use coordinator_store::{collections, Filter, Sort, Store};

use crate::{
	actors::{spawn_ticker, Die},
	error::{Error, Result},
	models::{
		credits::WorkProof,
		governance::{
			compute_tally, Comment, Delegation, Proposal, ProposalKind, ProposalStatus, TallyResult,
			Vote, VoteChoice, VoteTally, WeightMethod,
		},
		peer::Peer,
		poot::StakeValidation,
	},
	valuenet::ValueNetwork,
};

#[derive(Clone, Debug, Deserialize)]
pub struct GovernanceConfig {
	#[serde(default = "default_discussion_hours")]
	pub discussion_hours: i64,
	#[serde(default = "default_voting_hours")]
	pub voting_hours: i64,
	#[serde(default = "default_min_quorum")]
	pub min_quorum: f64,
	#[serde(default = "default_delegation_expiry")]
	pub delegation_expiry_days: i64,
	/// Active (draft/discussion/voting) proposals allowed per proposer.
	#[serde(default = "default_max_active_proposals")]
	pub max_active_proposals: i64,
	#[serde(default = "default_lifecycle_interval")]
	pub lifecycle_interval_secs: u64,
	/// Window for work-weighted voting power.
	#[serde(default = "default_weight_window")]
	pub weight_window_days: i64,
	/// Seconds a peer may be silent and still count as voting-eligible.
	#[serde(default = "default_eligibility_horizon")]
	pub eligibility_horizon_secs: u64,
}

impl Default for GovernanceConfig {
	fn default() -> Self {
		Self {
			discussion_hours: default_discussion_hours(),
			voting_hours: default_voting_hours(),
			min_quorum: default_min_quorum(),
			delegation_expiry_days: default_delegation_expiry(),
			max_active_proposals: default_max_active_proposals(),
			lifecycle_interval_secs: default_lifecycle_interval(),
			weight_window_days: default_weight_window(),
			eligibility_horizon_secs: default_eligibility_horizon(),
		}
	}
}

const fn default_discussion_hours() -> i64 {
	72
}

const fn default_voting_hours() -> i64 {
	168
}

const fn default_min_quorum() -> f64 {
	0.33
}

const fn default_delegation_expiry() -> i64 {
	30
}

const fn default_max_active_proposals() -> i64 {
	5
}

const fn default_lifecycle_interval() -> u64 {
	60
}

const fn default_weight_window() -> i64 {
	30
}

const fn default_eligibility_horizon() -> u64 {
	600
}

pub struct GovernanceEngine {
	store: Store,
	value_network: Arc<dyn ValueNetwork>,
	config: GovernanceConfig,
}

impl GovernanceEngine {
	pub fn new(store: Store, value_network: Arc<dyn ValueNetwork>, config: GovernanceConfig) -> Self {
		Self { store, value_network, config }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		self.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.create_index(&["status"], false)
			.await?;
		self.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.create_index(&["proposer_node_id", "status"], false)
			.await?;
		self.store.collection(collections::GOVERNANCE_VOTES).create_index(&["proposal_id"], false).await?;
		self.store
			.collection(collections::VOTE_DELEGATIONS)
			.create_index(&["delegator_node_id", "active"], false)
			.await?;
		self.store.collection(collections::GOVERNANCE_COMMENTS).create_index(&["proposal_id"], false).await?;
		Ok(())
	}

	async fn proposal(&self, proposal_id: &str) -> Result<Proposal> {
		self.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.get(proposal_id)
			.await?
			.ok_or_else(|| Error::validation(format!("unknown proposal {}", proposal_id)))
	}

	async fn save_proposal(&self, proposal: &Proposal) -> Result<()> {
		self.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.upsert(&proposal.proposal_id, proposal)
			.await?;
		Ok(())
	}

	async fn create_proposal(
		&self,
		proposer: NodeId,
		title: String,
		description: String,
		kind: ProposalKind,
		weight_method: WeightMethod,
		parameters: Value,
	) -> Result<Proposal> {
		if title.trim().is_empty() {
			return Err(Error::validation("proposal title must not be empty"));
		}
		let open = self
			.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.count(
				&Filter::new()
					.eq("proposer_node_id", proposer.as_str())
					.is_in("status", vec!["draft", "discussion", "voting"]),
			)
			.await?;
		if open >= self.config.max_active_proposals {
			return Err(Error::precondition(format!(
				"{} already has {} active proposals",
				proposer, open
			)));
		}
		let proposal = Proposal {
			proposal_id: util::fresh_id(),
			proposer_node_id: proposer,
			title,
			description,
			proposal_type: kind,
			weight_method,
			parameters,
			status: ProposalStatus::Draft,
			created_at: Utc::now(),
			discussion_start: None,
			voting_start: None,
			voting_end: None,
			executed_at: None,
			execution_hash: None,
		};
		self.save_proposal(&proposal).await?;
		log::info!("proposal {} created by {}", proposal.proposal_id, proposal.proposer_node_id);
		Ok(proposal)
	}

	async fn start_discussion(&self, proposal_id: &str) -> Result<Proposal> {
		let mut proposal = self.proposal(proposal_id).await?;
		if !proposal.status.can_transition_to(ProposalStatus::Discussion) {
			return Err(Error::precondition(format!(
				"proposal {} cannot move from {:?} to discussion",
				proposal_id, proposal.status
			)));
		}
		let now = Utc::now();
		proposal.status = ProposalStatus::Discussion;
		proposal.discussion_start = Some(now);
		proposal.voting_start = Some(now + ChronoDuration::hours(self.config.discussion_hours));
		proposal.voting_end = Some(
			now + ChronoDuration::hours(self.config.discussion_hours + self.config.voting_hours),
		);
		self.save_proposal(&proposal).await?;
		Ok(proposal)
	}

	/// Voting power of `node_id` under `method`. Stake reads the latest
	/// recorded stake validation, falling back to an adapter query against
	/// the node's registered stake address.
	async fn vote_weight(&self, node_id: &str, method: WeightMethod) -> Result<f64> {
		match method {
			WeightMethod::Equal => Ok(1.0),
			WeightMethod::StakeWeighted => self.stake_of(node_id).await,
			WeightMethod::WorkWeighted => Ok(self.recent_credits(node_id).await?.max(1.0)),
			WeightMethod::Hybrid => {
				let stake = self.stake_of(node_id).await?;
				let work = self.recent_credits(node_id).await?.max(1.0);
				Ok((stake + work) / 2.0)
			}
		}
	}

	async fn stake_of(&self, node_id: &str) -> Result<f64> {
		let latest: Option<StakeValidation> = self
			.store
			.collection(collections::STAKE_VALIDATIONS)
			.find(
				&Filter::new().eq("node_id", node_id).eq("valid", true),
				&[Sort::desc("validated_at")],
				Some(1),
			)
			.await?
			.pop();
		if let Some(validation) = latest {
			return Ok(validation.actual_amount);
		}
		let registration: Option<crate::models::registration::NodeRegistration> = self
			.store
			.collection(collections::NODE_REGISTRATIONS)
			.find_one(&Filter::new().eq("node_id", node_id).eq("status", "approved"))
			.await?;
		if let Some(registration) = registration {
			if let Ok(balance) = self.value_network.account_balance(&registration.stake_address).await {
				return Ok(balance.usdt);
			}
			return Ok(registration.stake_amount);
		}
		Ok(1.0)
	}

	async fn recent_credits(&self, node_id: &str) -> Result<f64> {
		let cutoff = Utc::now() - ChronoDuration::days(self.config.weight_window_days);
		let cutoff_slot = time::slot_at(cutoff, time::DEFAULT_SLOT_DURATION_SECS);
		let proofs: Vec<WorkProof> = self
			.store
			.collection(collections::TASK_PROOFS)
			.find(
				&Filter::new().gte("slot", cutoff_slot).any(vec![
					Filter::new().eq("node_id", node_id),
					Filter::new().eq("pool_id", node_id),
				]),
				&[],
				None,
			)
			.await?;
		Ok(proofs.iter().map(WorkProof::credits).sum())
	}

	async fn active_delegation(
		&self,
		delegator: &str,
		delegate: &str,
		kind: ProposalKind,
	) -> Result<Option<Delegation>> {
		let delegations: Vec<Delegation> = self
			.store
			.collection(collections::VOTE_DELEGATIONS)
			.find(
				&Filter::new()
					.eq("delegator_node_id", delegator)
					.eq("delegate_node_id", delegate)
					.eq("active", true),
				&[],
				None,
			)
			.await?;
		Ok(delegations.into_iter().find(|d| d.covers(kind, Utc::now())))
	}

	async fn cast_vote(
		&self,
		voter: NodeId,
		proposal_id: String,
		choice: VoteChoice,
		delegate_from: Option<NodeId>,
	) -> Result<Vote> {
		let proposal = self.proposal(&proposal_id).await?;
		let now = Utc::now();
		if !proposal.in_voting_window(now) {
			return Err(Error::precondition(format!(
				"proposal {} is not open for voting",
				proposal_id
			)));
		}
		// the vote spends the weight of whoever it speaks for
		let weight_holder = match &delegate_from {
			Some(delegator) => {
				if self
					.active_delegation(delegator, &voter, proposal.proposal_type)
					.await?
					.is_none()
				{
					return Err(Error::precondition(format!(
						"no active delegation from {} to {} covering {:?}",
						delegator, voter, proposal.proposal_type
					)));
				}
				delegator.clone()
			}
			None => voter.clone(),
		};
		let weight = self.vote_weight(&weight_holder, proposal.weight_method).await?;
		let vote = Vote {
			vote_id: util::fresh_id(),
			proposal_id: proposal_id.clone(),
			voter_node_id: voter,
			choice,
			weight,
			delegate_from,
			cast_at: now,
		};
		let fresh = self.store.collection(collections::GOVERNANCE_VOTES).insert(&vote.key(), &vote).await?;
		if !fresh {
			return Err(Error::validation(format!(
				"{} already voted on {}",
				weight_holder, proposal_id
			)));
		}
		self.update_tally(&proposal).await?;
		log::info!("vote on {} by {} ({:?}, weight {})", proposal_id, vote.voter_node_id, choice, weight);
		Ok(vote)
	}

	/// Σ voting weight across currently-active peers.
	async fn total_eligible_weight(&self, method: WeightMethod) -> Result<f64> {
		let peers: Vec<Peer> =
			self.store.collection(collections::PEERS).find(&Filter::new(), &[], None).await?;
		let horizon = ChronoDuration::seconds(self.config.eligibility_horizon_secs as i64);
		let now = Utc::now();
		let mut total = 0.0;
		for peer in peers.iter().filter(|p| p.is_active(horizon, now)) {
			total += self.vote_weight(&peer.node_id, method).await?;
		}
		Ok(total)
	}

	async fn update_tally(&self, proposal: &Proposal) -> Result<VoteTally> {
		let votes: Vec<Vote> = self
			.store
			.collection(collections::GOVERNANCE_VOTES)
			.find(&Filter::new().eq("proposal_id", proposal.proposal_id.as_str()), &[], None)
			.await?;
		let eligible = self.total_eligible_weight(proposal.weight_method).await?;
		let tally = compute_tally(&proposal.proposal_id, &votes, eligible, self.config.min_quorum);
		self.store
			.collection(collections::VOTE_TALLIES)
			.upsert(&proposal.proposal_id, &tally)
			.await?;
		Ok(tally)
	}

	/// One scheduler pass over the non-terminal proposals.
	async fn lifecycle_pass(&self) -> Result<()> {
		let now = Utc::now();
		let open: Vec<Proposal> = self
			.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.find(&Filter::new().is_in("status", vec!["discussion", "voting"]), &[], None)
			.await?;
		for mut proposal in open {
			match proposal.status {
				ProposalStatus::Discussion => {
					if proposal.voting_start.map_or(false, |start| now >= start) {
						proposal.status = ProposalStatus::Voting;
						self.save_proposal(&proposal).await?;
						log::info!("proposal {} entered voting", proposal.proposal_id);
					}
				}
				ProposalStatus::Voting => {
					if proposal.voting_end.map_or(false, |end| now >= end) {
						let tally = self.update_tally(&proposal).await?;
						proposal.status = match tally.result {
							TallyResult::Passed => ProposalStatus::Passed,
							TallyResult::Rejected => ProposalStatus::Rejected,
							// no quorum by close of voting
							TallyResult::Pending => ProposalStatus::Expired,
						};
						self.save_proposal(&proposal).await?;
						log::info!(
							"proposal {} closed: {:?} (yes {}, no {}, quorum {})",
							proposal.proposal_id,
							proposal.status,
							tally.yes_weight,
							tally.no_weight,
							tally.quorum_met
						);
					}
				}
				_ => {}
			}
		}
		Ok(())
	}

	async fn expire_delegations(&self) -> Result<()> {
		let now = Utc::now().timestamp_micros();
		let expired: Vec<Delegation> = self
			.store
			.collection(collections::VOTE_DELEGATIONS)
			.find(&Filter::new().eq("active", true).lt("expires_at", now), &[], None)
			.await?;
		for mut delegation in expired {
			delegation.active = false;
			self.store
				.collection(collections::VOTE_DELEGATIONS)
				.upsert(&delegation.delegation_id, &delegation)
				.await?;
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Actor for GovernanceEngine {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create governance indexes: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr.clone(), Duration::from_secs(self.config.lifecycle_interval_secs), || LifecycleTick);
		spawn_ticker(addr, Duration::from_secs(3600), || ExpireDelegations);
	}
}

struct LifecycleTick;

impl Message for LifecycleTick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<LifecycleTick> for GovernanceEngine {
	async fn handle(&mut self, _: LifecycleTick, _: &mut Context<Self>) {
		if let Err(e) = self.lifecycle_pass().await {
			log::error!("proposal lifecycle pass failed: {}", e);
		}
	}
}

struct ExpireDelegations;

impl Message for ExpireDelegations {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<ExpireDelegations> for GovernanceEngine {
	async fn handle(&mut self, _: ExpireDelegations, _: &mut Context<Self>) {
		if let Err(e) = self.expire_delegations().await {
			log::error!("delegation expiry sweep failed: {}", e);
		}
	}
}

pub struct CreateProposal {
	pub proposer: NodeId,
	pub title: String,
	pub description: String,
	pub proposal_type: ProposalKind,
	pub weight_method: WeightMethod,
	pub parameters: Value,
}

impl Message for CreateProposal {
	type Result = Result<Proposal>;
}

#[async_trait::async_trait]
impl Handler<CreateProposal> for GovernanceEngine {
	async fn handle(&mut self, msg: CreateProposal, _: &mut Context<Self>) -> Result<Proposal> {
		self.create_proposal(
			msg.proposer,
			msg.title,
			msg.description,
			msg.proposal_type,
			msg.weight_method,
			msg.parameters,
		)
		.await
	}
}

pub struct StartDiscussion(pub String);

impl Message for StartDiscussion {
	type Result = Result<Proposal>;
}

#[async_trait::async_trait]
impl Handler<StartDiscussion> for GovernanceEngine {
	async fn handle(&mut self, msg: StartDiscussion, _: &mut Context<Self>) -> Result<Proposal> {
		self.start_discussion(&msg.0).await
	}
}

pub struct CastVote {
	pub voter: NodeId,
	pub proposal_id: String,
	pub choice: VoteChoice,
	pub delegate_from: Option<NodeId>,
}

impl Message for CastVote {
	type Result = Result<Vote>;
}

#[async_trait::async_trait]
impl Handler<CastVote> for GovernanceEngine {
	async fn handle(&mut self, msg: CastVote, _: &mut Context<Self>) -> Result<Vote> {
		self.cast_vote(msg.voter, msg.proposal_id, msg.choice, msg.delegate_from).await
	}
}

pub struct DelegateVote {
	pub delegator: NodeId,
	pub delegate: NodeId,
	pub scope: Option<ProposalKind>,
}

impl Message for DelegateVote {
	type Result = Result<Delegation>;
}

#[async_trait::async_trait]
impl Handler<DelegateVote> for GovernanceEngine {
	async fn handle(&mut self, msg: DelegateVote, _: &mut Context<Self>) -> Result<Delegation> {
		if msg.delegator == msg.delegate {
			return Err(Error::validation("self-delegation is not allowed"));
		}
		let existing: Vec<Delegation> = self
			.store
			.collection(collections::VOTE_DELEGATIONS)
			.find(
				&Filter::new()
					.eq("delegator_node_id", msg.delegator.as_str())
					.eq("delegate_node_id", msg.delegate.as_str())
					.eq("active", true),
				&[],
				None,
			)
			.await?;
		let now = Utc::now();
		if existing.iter().any(|d| now < d.expires_at && d.overlaps(msg.scope)) {
			return Err(Error::precondition(format!(
				"overlapping active delegation from {} to {}",
				msg.delegator, msg.delegate
			)));
		}
		let delegation = Delegation {
			delegation_id: util::fresh_id(),
			delegator_node_id: msg.delegator,
			delegate_node_id: msg.delegate,
			scope: msg.scope,
			active: true,
			created_at: now,
			expires_at: now + ChronoDuration::days(self.config.delegation_expiry_days),
		};
		self.store
			.collection(collections::VOTE_DELEGATIONS)
			.upsert(&delegation.delegation_id, &delegation)
			.await?;
		Ok(delegation)
	}
}

pub struct RevokeDelegation {
	pub delegator: NodeId,
	pub delegation_id: String,
}

impl Message for RevokeDelegation {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<RevokeDelegation> for GovernanceEngine {
	async fn handle(&mut self, msg: RevokeDelegation, _: &mut Context<Self>) -> Result<bool> {
		let delegations = self.store.collection(collections::VOTE_DELEGATIONS);
		let mut delegation: Delegation = match delegations.get(&msg.delegation_id).await? {
			Some(d) => d,
			None => return Ok(false),
		};
		if delegation.delegator_node_id != msg.delegator {
			return Err(Error::precondition("only the delegator may revoke a delegation"));
		}
		if !delegation.active {
			return Ok(false);
		}
		delegation.active = false;
		delegations.upsert(&delegation.delegation_id, &delegation).await?;
		Ok(true)
	}
}

pub struct AddComment {
	pub commenter: NodeId,
	pub proposal_id: String,
	pub content: String,
	pub parent_comment_id: Option<String>,
}

impl Message for AddComment {
	type Result = Result<Comment>;
}

#[async_trait::async_trait]
impl Handler<AddComment> for GovernanceEngine {
	async fn handle(&mut self, msg: AddComment, _: &mut Context<Self>) -> Result<Comment> {
		if msg.content.trim().is_empty() {
			return Err(Error::validation("comment must not be empty"));
		}
		let proposal = self.proposal(&msg.proposal_id).await?;
		if proposal.status.is_terminal() {
			return Err(Error::precondition("proposal is closed for comments"));
		}
		let comment = Comment {
			comment_id: util::fresh_id(),
			proposal_id: msg.proposal_id,
			commenter_node_id: msg.commenter,
			content: msg.content,
			parent_comment_id: msg.parent_comment_id,
			created_at: Utc::now(),
		};
		self.store
			.collection(collections::GOVERNANCE_COMMENTS)
			.upsert(&comment.comment_id, &comment)
			.await?;
		Ok(comment)
	}
}

pub struct GetProposal(pub String);

impl Message for GetProposal {
	type Result = Result<Option<Proposal>>;
}

#[async_trait::async_trait]
impl Handler<GetProposal> for GovernanceEngine {
	async fn handle(&mut self, msg: GetProposal, _: &mut Context<Self>) -> Result<Option<Proposal>> {
		Ok(self.store.collection(collections::GOVERNANCE_PROPOSALS).get(&msg.0).await?)
	}
}

pub struct GetActiveProposals {
	pub kind: Option<ProposalKind>,
}

impl Message for GetActiveProposals {
	type Result = Result<Vec<Proposal>>;
}

#[async_trait::async_trait]
impl Handler<GetActiveProposals> for GovernanceEngine {
	async fn handle(&mut self, msg: GetActiveProposals, _: &mut Context<Self>) -> Result<Vec<Proposal>> {
		let mut filter = Filter::new().is_in("status", vec!["draft", "discussion", "voting"]);
		if let Some(kind) = msg.kind {
			filter = filter.eq("proposal_type", serde_json::to_value(kind)?);
		}
		let proposals = self
			.store
			.collection(collections::GOVERNANCE_PROPOSALS)
			.find(&filter, &[Sort::desc("created_at")], None)
			.await?;
		Ok(proposals)
	}
}

pub struct GetProposalVotes(pub String);

impl Message for GetProposalVotes {
	type Result = Result<Vec<Vote>>;
}

#[async_trait::async_trait]
impl Handler<GetProposalVotes> for GovernanceEngine {
	async fn handle(&mut self, msg: GetProposalVotes, _: &mut Context<Self>) -> Result<Vec<Vote>> {
		let votes = self
			.store
			.collection(collections::GOVERNANCE_VOTES)
			.find(&Filter::new().eq("proposal_id", msg.0), &[Sort::asc("cast_at")], None)
			.await?;
		Ok(votes)
	}
}

pub struct GetNodeDelegations {
	pub node_id: NodeId,
	/// true lists delegations granted by the node, false those it holds.
	pub as_delegator: bool,
}

impl Message for GetNodeDelegations {
	type Result = Result<Vec<Delegation>>;
}

#[async_trait::async_trait]
impl Handler<GetNodeDelegations> for GovernanceEngine {
	async fn handle(&mut self, msg: GetNodeDelegations, _: &mut Context<Self>) -> Result<Vec<Delegation>> {
		let field = if msg.as_delegator { "delegator_node_id" } else { "delegate_node_id" };
		let delegations = self
			.store
			.collection(collections::VOTE_DELEGATIONS)
			.find(
				&Filter::new().eq(field, msg.node_id).eq("active", true),
				&[Sort::desc("created_at")],
				None,
			)
			.await?;
		Ok(delegations)
	}
}

pub struct GetProposalComments(pub String);

impl Message for GetProposalComments {
	type Result = Result<Vec<Comment>>;
}

#[async_trait::async_trait]
impl Handler<GetProposalComments> for GovernanceEngine {
	async fn handle(&mut self, msg: GetProposalComments, _: &mut Context<Self>) -> Result<Vec<Comment>> {
		let comments = self
			.store
			.collection(collections::GOVERNANCE_COMMENTS)
			.find(&Filter::new().eq("proposal_id", msg.0), &[Sort::asc("created_at")], None)
			.await?;
		Ok(comments)
	}
}

pub struct GetProposalTally(pub String);

impl Message for GetProposalTally {
	type Result = Result<Option<VoteTally>>;
}

#[async_trait::async_trait]
impl Handler<GetProposalTally> for GovernanceEngine {
	async fn handle(&mut self, msg: GetProposalTally, _: &mut Context<Self>) -> Result<Option<VoteTally>> {
		Ok(self.store.collection(collections::VOTE_TALLIES).get(&msg.0).await?)
	}
}

pub struct CancelProposal {
	pub proposal_id: String,
	pub actor: NodeId,
}

impl Message for CancelProposal {
	type Result = Result<Proposal>;
}

#[async_trait::async_trait]
impl Handler<CancelProposal> for GovernanceEngine {
	async fn handle(&mut self, msg: CancelProposal, _: &mut Context<Self>) -> Result<Proposal> {
		let mut proposal = self.proposal(&msg.proposal_id).await?;
		if proposal.proposer_node_id != msg.actor {
			return Err(Error::precondition("only the proposer may cancel a proposal"));
		}
		if !proposal.status.can_transition_to(ProposalStatus::Cancelled) {
			return Err(Error::precondition(format!(
				"proposal in {:?} can no longer be cancelled",
				proposal.status
			)));
		}
		proposal.status = ProposalStatus::Cancelled;
		self.save_proposal(&proposal).await?;
		Ok(proposal)
	}
}

pub struct ExecuteProposal(pub String);

impl Message for ExecuteProposal {
	type Result = Result<Proposal>;
}

#[async_trait::async_trait]
impl Handler<ExecuteProposal> for GovernanceEngine {
	async fn handle(&mut self, msg: ExecuteProposal, _: &mut Context<Self>) -> Result<Proposal> {
		let mut proposal = self.proposal(&msg.0).await?;
		if !proposal.status.can_transition_to(ProposalStatus::Executed) {
			return Err(Error::precondition(format!(
				"proposal {} has not passed",
				proposal.proposal_id
			)));
		}
		proposal.status = ProposalStatus::Executed;
		proposal.executed_at = Some(Utc::now());
		proposal.execution_hash = Some(util::canonical_json_hash(&proposal.parameters));
		self.save_proposal(&proposal).await?;
		log::info!("executed proposal {}", proposal.proposal_id);
		Ok(proposal)
	}
}

pub struct GovernanceStats;

impl Message for GovernanceStats {
	type Result = Result<Value>;
}

#[async_trait::async_trait]
impl Handler<GovernanceStats> for GovernanceEngine {
	async fn handle(&mut self, _: GovernanceStats, _: &mut Context<Self>) -> Result<Value> {
		let proposals = self.store.collection(collections::GOVERNANCE_PROPOSALS);
		let total = proposals.count(&Filter::new()).await?;
		let active = proposals
			.count(&Filter::new().is_in("status", vec!["draft", "discussion", "voting"]))
			.await?;
		let passed = proposals.count(&Filter::new().eq("status", "passed")).await?;
		let executed = proposals.count(&Filter::new().eq("status", "executed")).await?;
		let votes = self.store.collection(collections::GOVERNANCE_VOTES).count(&Filter::new()).await?;
		let delegations = self
			.store
			.collection(collections::VOTE_DELEGATIONS)
			.count(&Filter::new().eq("active", true))
			.await?;
		Ok(json!({
			"total_proposals": total,
			"active_proposals": active,
			"passed_proposals": passed,
			"executed_proposals": executed,
			"total_votes": votes,
			"active_delegations": delegations,
		}))
	}
}

#[async_trait::async_trait]
impl Handler<Die> for GovernanceEngine {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
