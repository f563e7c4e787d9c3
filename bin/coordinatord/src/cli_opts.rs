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

use std::path::PathBuf;

use clap::Parser;

#[derive(Clone, Debug, Parser)]
#[command(name = "coordinatord", about = "Coordination-plane daemon for the session overlay")]
pub struct CliOpts {
	/// Path to the TOML configuration file.
	#[arg(short, long)]
	pub config: PathBuf,

	/// Increase log verbosity (-v, -vv, -vvv).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}

impl CliOpts {
	pub fn parse_args() -> Self {
		Self::parse()
	}

	pub fn log_level(&self) -> log::LevelFilter {
		match self.verbose {
			0 | 1 | 2 => log::LevelFilter::Info,
			3 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		}
	}
}
