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

//! One long-lived actor per subsystem. Each owns its collections and its
//! in-memory projections; anything cross-subsystem goes through the store
//! or a submitted sync operation.

pub mod credits;
pub mod flags;
pub mod governance;
pub mod operator_sync;
pub mod payouts;
pub mod peers;
pub mod placer;
pub mod pools;
pub mod poot;
pub mod registration;
pub mod shard_manager;

pub use self::{
	credits::WorkCreditsEngine, flags::FlagEngine, governance::GovernanceEngine,
	operator_sync::OperatorSyncEngine, payouts::PayoutBatcher, peers::PeerDirectory,
	placer::ShardPlacer, pools::PoolCoordinator, poot::PootValidator,
	registration::RegistrationProtocol, shard_manager::ShardManager,
};
