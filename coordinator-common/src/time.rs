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

//! Slot and epoch arithmetic. Slots quantize work proofs, epochs bound the
//! monthly ranking window. Both count from a fixed network genesis instant.

use chrono::{DateTime, TimeZone, Utc};

/// Default length of one work-proof slot.
pub const DEFAULT_SLOT_DURATION_SECS: u64 = 120;

/// Days per ranking epoch.
const EPOCH_LENGTH_DAYS: i64 = 30;

/// The instant slot 0 and epoch 0 begin: 2025-01-01T00:00:00Z.
pub fn genesis() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("genesis instant is a valid UTC datetime")
}

/// Slot containing `at`, for the given slot duration. Instants before genesis
/// land in negative slots; callers reject proofs from them.
pub fn slot_at(at: DateTime<Utc>, slot_duration_secs: u64) -> i64 {
	let elapsed = at.signed_duration_since(genesis()).num_seconds();
	elapsed.div_euclid(slot_duration_secs as i64)
}

/// Epoch containing `at`.
pub fn epoch_at(at: DateTime<Utc>) -> i64 {
	let days = at.signed_duration_since(genesis()).num_days();
	days.div_euclid(EPOCH_LENGTH_DAYS)
}

/// Slot containing the current instant.
pub fn current_slot(slot_duration_secs: u64) -> i64 {
	slot_at(Utc::now(), slot_duration_secs)
}

/// Epoch containing the current instant.
pub fn current_epoch() -> i64 {
	epoch_at(Utc::now())
}

/// Number of slots expected in `window_secs` of wall time.
pub fn slots_in(window_secs: u64, slot_duration_secs: u64) -> i64 {
	(window_secs / slot_duration_secs.max(1)) as i64
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	#[test]
	fn slot_zero_begins_at_genesis() {
		assert_eq!(slot_at(genesis(), DEFAULT_SLOT_DURATION_SECS), 0);
		assert_eq!(slot_at(genesis() + Duration::seconds(119), DEFAULT_SLOT_DURATION_SECS), 0);
		assert_eq!(slot_at(genesis() + Duration::seconds(120), DEFAULT_SLOT_DURATION_SECS), 1);
	}

	#[test]
	fn pre_genesis_instants_are_negative() {
		assert!(slot_at(genesis() - Duration::seconds(1), DEFAULT_SLOT_DURATION_SECS) < 0);
		assert!(epoch_at(genesis() - Duration::days(1)) < 0);
	}

	#[test]
	fn epochs_are_monthly() {
		assert_eq!(epoch_at(genesis()), 0);
		assert_eq!(epoch_at(genesis() + Duration::days(29)), 0);
		assert_eq!(epoch_at(genesis() + Duration::days(30)), 1);
		assert_eq!(epoch_at(genesis() + Duration::days(365)), 12);
	}

	#[test]
	fn expected_slots_per_day() {
		assert_eq!(slots_in(86_400, DEFAULT_SLOT_DURATION_SECS), 720);
	}
}
