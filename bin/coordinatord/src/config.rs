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

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use overlay_coordinator::{ControlConfig, NodeIdentity};

use crate::cli_opts::CliOpts;

#[derive(Clone, Debug, Deserialize)]
struct TomlConfig {
	node: NodeIdentity,
	/// Bootstrap entries, `node_id@onion_address:port`.
	#[serde(default)]
	bootstrap: Vec<String>,
	pg_url: Option<String>,
	socks_proxy: Option<String>,
	tron_gateway: Option<String>,
	tron_api_key: Option<String>,
	/// Queue writes while the store is unreachable instead of failing.
	#[serde(default)]
	queue_writes: bool,
	#[serde(default)]
	control: ControlConfig,
}

#[derive(Clone, Debug)]
pub struct Config {
	cli: CliOpts,
	identity: NodeIdentity,
	pg_url: Option<String>,
	socks_proxy: Option<String>,
	tron_gateway: Option<String>,
	tron_api_key: Option<String>,
	queue_writes: bool,
	control: ControlConfig,
}

impl Config {
	pub fn new() -> Result<Self> {
		let cli = CliOpts::parse_args();
		let toml_conf = Self::parse_file(cli.config.as_path())?;
		log::debug!("{:?}", toml_conf);

		let mut control = toml_conf.control;
		if control.peers.bootstrap.is_empty() {
			control.peers.bootstrap = toml_conf.bootstrap;
		}

		Ok(Self {
			cli,
			identity: toml_conf.node,
			pg_url: toml_conf.pg_url,
			socks_proxy: toml_conf.socks_proxy,
			tron_gateway: toml_conf.tron_gateway,
			tron_api_key: toml_conf.tron_api_key,
			queue_writes: toml_conf.queue_writes,
			control,
		})
	}

	fn parse_file(path: &Path) -> Result<TomlConfig> {
		let toml_str = std::fs::read_to_string(path)
			.with_context(|| format!("could not read config file {}", path.display()))?;
		toml::from_str(toml_str.as_str()).context("malformed config file")
	}

	pub fn cli(&self) -> &CliOpts {
		&self.cli
	}

	pub fn identity(&self) -> NodeIdentity {
		self.identity.clone()
	}

	pub fn pg_url(&self) -> Option<String> {
		self.pg_url.clone()
	}

	pub fn socks_proxy(&self) -> Option<String> {
		self.socks_proxy.clone()
	}

	pub fn tron_gateway(&self) -> Option<String> {
		self.tron_gateway.clone()
	}

	pub fn tron_api_key(&self) -> Option<String> {
		self.tron_api_key.clone()
	}

	pub fn queue_writes(&self) -> bool {
		self.queue_writes
	}

	pub fn control(&self) -> ControlConfig {
		self.control.clone()
	}
}
