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

//! The anonymized HTTP channel to other peers. Plain HTTP through a SOCKS5h
//! proxy so `.onion` names resolve inside the tunnel; the core only ever
//! touches the handful of peer endpoints named here.

use std::time::Duration;

use serde::Deserialize;

use crate::{
	error::Result,
	models::{peer::Peer, shards::HostMetricsReport},
};

/// Narrow contract over the overlay transport. The production client speaks
/// SOCKS; tests swap in an in-memory fake.
#[async_trait::async_trait]
pub trait OverlayApi: Send + Sync + 'static {
	/// `GET /health`; true on 200.
	async fn health(&self, address: &str, port: u16) -> Result<bool>;

	/// `GET /api/peers`.
	async fn peer_list(&self, address: &str, port: u16) -> Result<Vec<Peer>>;

	/// `GET /health/metrics`.
	async fn health_metrics(&self, address: &str, port: u16) -> Result<HostMetricsReport>;

	/// `POST /registration/ping?token=…`; the peer echoes `pong_<token>`.
	async fn registration_ping(&self, address: &str, port: u16, token: &str) -> Result<bool>;

	/// `GET /storage/verify/{shard}` → the host-side hash of the shard.
	async fn shard_hash(&self, address: &str, port: u16, shard_id: &str) -> Result<String>;
}

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const PEER_LIST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct PeerListResponse {
	#[serde(default)]
	peers: Vec<Peer>,
}

#[derive(Deserialize)]
struct ShardHashResponse {
	hash: String,
}

/// Production overlay client: HTTP over a local SOCKS proxy.
pub struct SocksOverlayClient {
	client: reqwest::Client,
}

impl SocksOverlayClient {
	/// `proxy` is a `socks5h://host:port` URL; the `h` matters, name
	/// resolution must happen on the far side of the tunnel.
	pub fn new(proxy: &str) -> Result<Self> {
		let client = reqwest::Client::builder()
			.proxy(reqwest::Proxy::all(proxy)?)
			.timeout(PEER_LIST_TIMEOUT)
			.build()?;
		Ok(Self { client })
	}

	fn url(address: &str, port: u16, path: &str) -> String {
		format!("http://{}:{}{}", address, port, path)
	}
}

#[async_trait::async_trait]
impl OverlayApi for SocksOverlayClient {
	async fn health(&self, address: &str, port: u16) -> Result<bool> {
		let resp = self
			.client
			.get(Self::url(address, port, "/health"))
			.timeout(HEALTH_TIMEOUT)
			.send()
			.await?;
		Ok(resp.status().is_success())
	}

	async fn peer_list(&self, address: &str, port: u16) -> Result<Vec<Peer>> {
		let resp: PeerListResponse = self
			.client
			.get(Self::url(address, port, "/api/peers"))
			.timeout(PEER_LIST_TIMEOUT)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(resp.peers)
	}

	async fn health_metrics(&self, address: &str, port: u16) -> Result<HostMetricsReport> {
		let report = self
			.client
			.get(Self::url(address, port, "/health/metrics"))
			.timeout(HEALTH_TIMEOUT)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(report)
	}

	async fn registration_ping(&self, address: &str, port: u16, token: &str) -> Result<bool> {
		let url = format!("{}?token={}", Self::url(address, port, "/registration/ping"), token);
		let body = self
			.client
			.post(url)
			.timeout(HEALTH_TIMEOUT)
			.send()
			.await?
			.error_for_status()?
			.text()
			.await?;
		Ok(body.trim() == format!("pong_{}", token))
	}

	async fn shard_hash(&self, address: &str, port: u16, shard_id: &str) -> Result<String> {
		let resp: ShardHashResponse = self
			.client
			.get(Self::url(address, port, &format!("/storage/verify/{}", shard_id)))
			.timeout(HEALTH_TIMEOUT)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(resp.hash)
	}
}
