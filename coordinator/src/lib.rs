// Copyright 2018-2021 Parity Technologies (UK) Ltd.
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

//! Node-coordination plane of the remote-desktop overlay network: peer
//! discovery, work credits, pools, governance, flags, ownership proofs,
//! operator sync, shard placement and payouts, behind one supervising
//! [`System`].

#![forbid(unsafe_code)]

pub mod actors;
pub mod crypto;
pub mod daemon;
mod error;
pub mod logger;
pub mod models;
pub mod overlay;
pub mod valuenet;

pub use self::{
	actors::{ControlConfig, NodeIdentity, System, SystemConfig},
	daemon::CoordinatorBuilder,
	error::{Error, ErrorKind, ErrorResponse, Result},
};

// Re-exports the binary and tests lean on.
pub use coordinator_common as common;
pub use coordinator_store as store;
