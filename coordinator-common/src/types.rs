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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque node identifier. Assigned at registration and treated as an
/// uninterpreted string everywhere else.
pub type NodeId = String;

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
	kind: &'static str,
	value: String,
}

/// The role a node plays on the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Worker,
	Server,
	Admin,
	Dev,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Worker => "worker",
			Role::Server => "server",
			Role::Admin => "admin",
			Role::Dev => "dev",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = ParseEnumError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"worker" => Ok(Role::Worker),
			"server" => Ok(Role::Server),
			"admin" => Ok(Role::Admin),
			"dev" => Ok(Role::Dev),
			other => Err(ParseEnumError { kind: "role", value: other.to_string() }),
		}
	}
}

/// A capability a node advertises to the rest of the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
	Relay,
	Storage,
	Poot,
	Validation,
}

impl fmt::Display for Capability {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			Capability::Relay => "relay",
			Capability::Storage => "storage",
			Capability::Poot => "poot",
			Capability::Validation => "validation",
		};
		f.write_str(s)
	}
}

impl FromStr for Capability {
	type Err = ParseEnumError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"relay" => Ok(Capability::Relay),
			"storage" => Ok(Capability::Storage),
			"poot" => Ok(Capability::Poot),
			"validation" => Ok(Capability::Validation),
			other => Err(ParseEnumError { kind: "capability", value: other.to_string() }),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roles_round_trip_through_str() {
		for role in [Role::Worker, Role::Server, Role::Admin, Role::Dev] {
			assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
		}
		assert!("observer".parse::<Role>().is_err());
	}

	#[test]
	fn capability_serializes_snake_case() {
		let json = serde_json::to_string(&Capability::Poot).unwrap();
		assert_eq!(json, "\"poot\"");
	}
}
