// Copyright 2019-2021 Parity Technologies (UK) Ltd.
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

//! Canonical collection names. Every persisted collection in the plane is
//! listed here; components never invent names inline.

pub const PEERS: &str = "peers";

pub const TASK_PROOFS: &str = "task_proofs";
pub const WORK_TALLY: &str = "work_tally";

pub const NODE_POOLS: &str = "node_pools";
pub const POOL_JOIN_REQUESTS: &str = "pool_join_requests";
pub const POOL_SYNC_OPERATIONS: &str = "pool_sync_operations";

pub const GOVERNANCE_PROPOSALS: &str = "governance_proposals";
pub const GOVERNANCE_VOTES: &str = "governance_votes";
pub const VOTE_DELEGATIONS: &str = "vote_delegations";
pub const GOVERNANCE_COMMENTS: &str = "governance_comments";
pub const VOTE_TALLIES: &str = "vote_tallies";

pub const NODE_FLAGS: &str = "node_flags";
pub const FLAG_EVENTS: &str = "flag_events";
pub const FLAG_RULES: &str = "flag_rules";
pub const NODE_FLAG_SUMMARIES: &str = "node_flag_summaries";

pub const POOT_CHALLENGES: &str = "poot_challenges";
pub const POOT_PROOFS: &str = "poot_proofs";
pub const STAKE_VALIDATIONS: &str = "stake_validations";
pub const FRAUD_EVENTS: &str = "fraud_events";
pub const NODE_VALIDATION_STATS: &str = "node_validation_stats";

pub const NODE_REGISTRATIONS: &str = "node_registrations";
pub const REGISTRATION_CHALLENGES: &str = "registration_challenges";

pub const SHARD_HOSTS: &str = "shard_hosts";
pub const SHARDS: &str = "shards";
pub const SHARD_CREATION_TASKS: &str = "shard_creation_tasks";
pub const MAINTENANCE_WINDOWS: &str = "maintenance_windows";
pub const PERFORMANCE_METRICS: &str = "performance_metrics";
pub const INTEGRITY_CHECKS: &str = "integrity_checks";
pub const REPAIR_OPERATIONS: &str = "repair_operations";

pub const OPERATORS: &str = "operators";
pub const SYNC_OPERATIONS: &str = "sync_operations";
pub const STATE_CHECKPOINTS: &str = "state_checkpoints";
pub const SYNC_CONFLICTS: &str = "sync_conflicts";
pub const OPERATOR_METRICS: &str = "operator_metrics";

pub const PAYOUT_REQUESTS: &str = "payout_requests";
pub const PAYOUT_BATCHES: &str = "payout_batches";
pub const TRON_TRANSACTIONS: &str = "tron_transactions";
