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

//! Persisted entities of the coordination plane, one module per subsystem.
//! Documents are upserted whole; cross-references are always identifiers.

pub mod credits;
pub mod flags;
pub mod governance;
pub mod payouts;
pub mod peer;
pub mod pools;
pub mod poot;
pub mod registration;
pub mod shards;
pub mod sync;
