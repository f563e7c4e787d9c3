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

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use coordinator_common::{Capability, NodeId, Role};

use crate::error::{Error, Result};

/// A peer known to the directory, liveness included.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
	pub node_id: NodeId,
	pub onion_address: String,
	pub port: u16,
	pub role: Role,
	#[serde(default)]
	pub capabilities: BTreeSet<Capability>,
	#[serde(with = "chrono::serde::ts_microseconds")]
	pub last_seen: DateTime<Utc>,
	#[serde(default)]
	pub work_credits: f64,
	#[serde(default)]
	pub uptime_percentage: f64,
}

impl Peer {
	/// A peer counts as active while its last successful ping is within the
	/// configured horizon.
	pub fn is_active(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
		now.signed_duration_since(self.last_seen) <= horizon
	}

	/// Gone entirely; removed from the directory.
	pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
		now.signed_duration_since(self.last_seen) > Duration::hours(24)
	}
}

/// Parse a bootstrap entry of the form `node_id@onion_address:port`.
pub fn parse_bootstrap(entry: &str) -> Result<Peer> {
	let (node_id, addr) = entry
		.split_once('@')
		.ok_or_else(|| Error::validation(format!("bootstrap entry `{}` missing `@`", entry)))?;
	let (onion_address, port) = addr
		.rsplit_once(':')
		.ok_or_else(|| Error::validation(format!("bootstrap entry `{}` missing `:port`", entry)))?;
	let port: u16 = port
		.parse()
		.map_err(|_| Error::validation(format!("bootstrap entry `{}` has a bad port", entry)))?;
	if node_id.is_empty() || onion_address.is_empty() {
		return Err(Error::validation(format!("bootstrap entry `{}` is incomplete", entry)));
	}
	Ok(Peer {
		node_id: node_id.to_string(),
		onion_address: onion_address.to_string(),
		port,
		// bootstrap nodes are long-lived infrastructure
		role: Role::Server,
		capabilities: BTreeSet::new(),
		last_seen: Utc::now(),
		work_credits: 0.0,
		uptime_percentage: 0.0,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bootstrap_entries_parse() {
		let peer = parse_bootstrap("boot1@abcdefabcdef.onion:5050").unwrap();
		assert_eq!(peer.node_id, "boot1");
		assert_eq!(peer.onion_address, "abcdefabcdef.onion");
		assert_eq!(peer.port, 5050);
		assert_eq!(peer.role, Role::Server);
	}

	#[test]
	fn malformed_bootstrap_entries_are_rejected() {
		assert!(parse_bootstrap("no-at-sign.onion:5050").is_err());
		assert!(parse_bootstrap("node@addr-without-port").is_err());
		assert!(parse_bootstrap("node@addr:notaport").is_err());
	}

	#[test]
	fn activity_horizon_bounds_last_seen() {
		let now = Utc::now();
		let peer = Peer {
			node_id: "n1".into(),
			onion_address: "x.onion".into(),
			port: 5050,
			role: Role::Worker,
			capabilities: BTreeSet::new(),
			last_seen: now - Duration::minutes(9),
			work_credits: 0.0,
			uptime_percentage: 0.0,
		};
		assert!(peer.is_active(Duration::minutes(10), now));
		assert!(!peer.is_active(Duration::minutes(5), now));
		assert!(!peer.is_stale(now));
	}
}
