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

//! Builder wiring the daemon together: store, overlay transport, value
//! network and identity, yielding a [`System`] ready to drive.

use std::{env, sync::Arc};

use coordinator_store::StoreConfig;

use crate::{
	actors::{ControlConfig, NodeIdentity, System, SystemConfig},
	error::{Error, Result},
	overlay::{OverlayApi, SocksOverlayClient},
	valuenet::{TronGateway, ValueNetwork},
};

const POSTGRES_VAR: &str = "DATABASE_URL";
const SOCKS_VAR: &str = "SOCKS_PROXY";
const TRON_GATEWAY_VAR: &str = "TRON_GATEWAY_URL";
const TRON_KEY_VAR: &str = "TRON_API_KEY";

const DEFAULT_SOCKS_PROXY: &str = "socks5h://127.0.0.1:9050";

pub struct CoordinatorBuilder {
	identity: Option<NodeIdentity>,
	pg_url: Option<String>,
	socks_proxy: Option<String>,
	tron_gateway: Option<String>,
	tron_api_key: Option<String>,
	control: ControlConfig,
	store: StoreConfig,
	overlay: Option<Arc<dyn OverlayApi>>,
	value_network: Option<Arc<dyn ValueNetwork>>,
}

impl Default for CoordinatorBuilder {
	fn default() -> Self {
		Self {
			identity: None,
			pg_url: None,
			socks_proxy: None,
			tron_gateway: None,
			tron_api_key: None,
			control: ControlConfig::default(),
			store: StoreConfig::default(),
			overlay: None,
			value_network: None,
		}
	}
}

impl CoordinatorBuilder {
	/// This node's identity; required.
	pub fn identity(mut self, identity: NodeIdentity) -> Self {
		self.identity = Some(identity);
		self
	}

	/// Postgres URL.
	///
	/// # Default
	/// The `DATABASE_URL` environment variable.
	pub fn pg_url<S: Into<String>>(mut self, url: Option<S>) -> Self {
		self.pg_url = url.map(Into::into);
		self
	}

	/// SOCKS proxy the overlay traffic tunnels through.
	///
	/// # Default
	/// `SOCKS_PROXY`, falling back to the local Tor default.
	pub fn socks_proxy<S: Into<String>>(mut self, proxy: Option<S>) -> Self {
		self.socks_proxy = proxy.map(Into::into);
		self
	}

	/// Value-network gateway URL.
	///
	/// # Default
	/// The `TRON_GATEWAY_URL` environment variable.
	pub fn tron_gateway<S: Into<String>>(mut self, url: Option<S>) -> Self {
		self.tron_gateway = url.map(Into::into);
		self
	}

	pub fn tron_api_key<S: Into<String>>(mut self, key: Option<S>) -> Self {
		self.tron_api_key = key.map(Into::into);
		self
	}

	pub fn control(mut self, control: ControlConfig) -> Self {
		self.control = control;
		self
	}

	pub fn store_config(mut self, store: StoreConfig) -> Self {
		self.store = store;
		self
	}

	/// Swap the overlay transport; tests use an in-memory fake.
	pub fn overlay(mut self, overlay: Arc<dyn OverlayApi>) -> Self {
		self.overlay = Some(overlay);
		self
	}

	/// Swap the value-network adapter; tests use a deterministic fake.
	pub fn value_network(mut self, value_network: Arc<dyn ValueNetwork>) -> Self {
		self.value_network = Some(value_network);
		self
	}

	/// Assemble the system. Store migrations run when the system's runtime
	/// thread starts, not here.
	pub fn build(self) -> Result<System> {
		let identity = self
			.identity
			.ok_or_else(|| Error::Config("node identity is required".into()))?;
		let store_url = match self.pg_url {
			Some(url) => url,
			None => env::var(POSTGRES_VAR)
				.map_err(|_| Error::Config(format!("{} must be set if no pg_url is passed", POSTGRES_VAR)))?,
		};
		let socks = self
			.socks_proxy
			.or_else(|| env::var(SOCKS_VAR).ok())
			.unwrap_or_else(|| DEFAULT_SOCKS_PROXY.to_string());
		let overlay: Arc<dyn OverlayApi> = match self.overlay {
			Some(overlay) => overlay,
			None => Arc::new(SocksOverlayClient::new(&socks)?),
		};
		let value_network: Arc<dyn ValueNetwork> = match self.value_network {
			Some(value_network) => value_network,
			None => {
				let gateway_url = match self.tron_gateway {
					Some(url) => url,
					None => env::var(TRON_GATEWAY_VAR).map_err(|_| {
						Error::Config(format!("{} must be set if no gateway is passed", TRON_GATEWAY_VAR))
					})?,
				};
				let api_key = self.tron_api_key.or_else(|| env::var(TRON_KEY_VAR).ok());
				Arc::new(TronGateway::new(&gateway_url, api_key)?)
			}
		};

		log::info!(
			"starting coordination plane for node `{}` ({}:{}, role {})",
			identity.node_id,
			identity.onion_address,
			identity.port,
			identity.role,
		);
		Ok(System::new(SystemConfig {
			store_url,
			store_config: self.store,
			overlay,
			value_network,
			identity,
			control: self.control,
		}))
	}
}
