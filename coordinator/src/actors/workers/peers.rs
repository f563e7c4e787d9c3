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

//! Peer directory: known peers, liveness, and overlay gossip. The in-memory
//! map is a projection of the `peers` collection, rebuilt on startup.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use hashbrown::HashMap;
use serde::Deserialize;
use xtra::prelude::*;

use coordinator_common::{NodeId, Role};
use coordinator_store::{collections, Filter, Store};

use crate::{
	actors::{spawn_ticker, Die, NodeIdentity},
	error::Result,
	models::peer::{parse_bootstrap, Peer},
	overlay::OverlayApi,
};

#[derive(Clone, Debug, Deserialize)]
pub struct PeerConfig {
	/// Seconds between discovery sweeps.
	#[serde(default = "default_discovery_interval")]
	pub discovery_interval_secs: u64,
	/// How recently a peer must have answered a ping to count as active.
	#[serde(default = "default_active_horizon")]
	pub active_horizon_secs: u64,
	/// Bounded fan-out while pinging.
	#[serde(default = "default_ping_parallelism")]
	pub ping_parallelism: usize,
	/// Bootstrap entries, `node_id@onion_address:port`.
	#[serde(default)]
	pub bootstrap: Vec<String>,
}

impl Default for PeerConfig {
	fn default() -> Self {
		Self {
			discovery_interval_secs: default_discovery_interval(),
			active_horizon_secs: default_active_horizon(),
			ping_parallelism: default_ping_parallelism(),
			bootstrap: Vec::new(),
		}
	}
}

const fn default_discovery_interval() -> u64 {
	60
}

const fn default_active_horizon() -> u64 {
	600
}

const fn default_ping_parallelism() -> usize {
	8
}

pub struct PeerDirectory {
	store: Store,
	overlay: Arc<dyn OverlayApi>,
	config: PeerConfig,
	identity: NodeIdentity,
	peers: HashMap<NodeId, Peer>,
}

impl PeerDirectory {
	pub fn new(store: Store, overlay: Arc<dyn OverlayApi>, config: PeerConfig, identity: NodeIdentity) -> Self {
		Self { store, overlay, config, identity, peers: HashMap::new() }
	}

	async fn ensure_indexes(&self) -> Result<()> {
		let peers = self.store.collection(collections::PEERS);
		peers.create_index(&["role"], false).await?;
		peers.create_index(&["last_seen"], false).await?;
		Ok(())
	}

	async fn load(&mut self) -> Result<()> {
		let known: Vec<Peer> =
			self.store.collection(collections::PEERS).find(&Filter::new(), &[], None).await?;
		log::info!("peer directory loaded {} known peers", known.len());
		self.peers = known.into_iter().map(|p| (p.node_id.clone(), p)).collect();
		Ok(())
	}

	async fn save(&self, peer: &Peer) -> Result<()> {
		self.store.collection(collections::PEERS).upsert(&peer.node_id, peer).await?;
		Ok(())
	}

	async fn add_peer(&mut self, peer: Peer) -> Result<()> {
		if peer.node_id == self.identity.node_id {
			return Ok(());
		}
		self.save(&peer).await?;
		log::info!("added peer {}@{}", peer.node_id, peer.onion_address);
		self.peers.insert(peer.node_id.clone(), peer);
		Ok(())
	}

	async fn remove_peer(&mut self, node_id: &str) -> Result<bool> {
		if self.peers.remove(node_id).is_none() {
			return Ok(false);
		}
		self.store.collection(collections::PEERS).delete(node_id).await?;
		log::info!("removed peer {}", node_id);
		Ok(true)
	}

	fn active_peers(&self) -> Vec<Peer> {
		let now = Utc::now();
		let horizon = ChronoDuration::seconds(self.config.active_horizon_secs as i64);
		self.peers.values().filter(|p| p.is_active(horizon, now)).cloned().collect()
	}

	/// One discovery sweep: seed from bootstrap while the directory is
	/// empty, ping everyone with bounded parallelism, fold in the peer
	/// lists of live peers, then drop anything stale beyond 24 h.
	async fn discover(&mut self) -> Result<()> {
		if self.peers.is_empty() {
			self.bootstrap().await;
		}

		let targets: Vec<Peer> = self.peers.values().cloned().collect();
		let overlay = self.overlay.clone();
		let results: Vec<(NodeId, bool, Vec<Peer>)> = stream::iter(targets)
			.map(|peer| {
				let overlay = overlay.clone();
				async move {
					let alive = overlay
						.health(&peer.onion_address, peer.port)
						.await
						.unwrap_or(false);
					let discovered = if alive {
						overlay.peer_list(&peer.onion_address, peer.port).await.unwrap_or_default()
					} else {
						Vec::new()
					};
					(peer.node_id, alive, discovered)
				}
			})
			.buffer_unordered(self.config.ping_parallelism)
			.collect()
			.await;

		let now = Utc::now();
		let mut newly_discovered = Vec::new();
		for (node_id, alive, discovered) in results {
			if alive {
				if let Some(peer) = self.peers.get_mut(&node_id) {
					peer.last_seen = now;
					let snapshot = peer.clone();
					self.save(&snapshot).await?;
				}
				for peer in discovered {
					if peer.node_id != self.identity.node_id && !self.peers.contains_key(&peer.node_id) {
						newly_discovered.push(peer);
					}
				}
			}
		}
		for peer in newly_discovered {
			self.add_peer(peer).await?;
		}

		let stale: Vec<NodeId> = self
			.peers
			.values()
			.filter(|p| p.is_stale(now))
			.map(|p| p.node_id.clone())
			.collect();
		for node_id in stale {
			self.remove_peer(&node_id).await?;
		}
		Ok(())
	}

	async fn bootstrap(&mut self) {
		for entry in self.config.bootstrap.clone() {
			match parse_bootstrap(&entry) {
				Ok(peer) => {
					let alive =
						self.overlay.health(&peer.onion_address, peer.port).await.unwrap_or(false);
					if alive {
						if let Err(e) = self.add_peer(peer).await {
							log::warn!("failed to add bootstrap peer: {}", e);
						}
					} else {
						log::debug!("bootstrap peer {} unreachable", entry);
					}
				}
				Err(e) => log::warn!("skipping bootstrap entry `{}`: {}", entry, e),
			}
		}
	}
}

#[async_trait::async_trait]
impl Actor for PeerDirectory {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		if let Err(e) = self.ensure_indexes().await {
			log::warn!("failed to create peer indexes: {}", e);
		}
		if let Err(e) = self.load().await {
			log::error!("failed to load peers: {}", e);
		}
		let addr = ctx.address().expect("Actor just started");
		spawn_ticker(addr, std::time::Duration::from_secs(self.config.discovery_interval_secs), || Discover);
	}
}

struct Discover;

impl Message for Discover {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Discover> for PeerDirectory {
	async fn handle(&mut self, _: Discover, _: &mut Context<Self>) {
		if let Err(e) = self.discover().await {
			log::error!("discovery sweep failed: {}", e);
		}
	}
}

pub struct AddPeer(pub Peer);

impl Message for AddPeer {
	type Result = Result<()>;
}

#[async_trait::async_trait]
impl Handler<AddPeer> for PeerDirectory {
	async fn handle(&mut self, msg: AddPeer, _: &mut Context<Self>) -> Result<()> {
		self.add_peer(msg.0).await
	}
}

pub struct RemovePeer(pub NodeId);

impl Message for RemovePeer {
	type Result = Result<bool>;
}

#[async_trait::async_trait]
impl Handler<RemovePeer> for PeerDirectory {
	async fn handle(&mut self, msg: RemovePeer, _: &mut Context<Self>) -> Result<bool> {
		self.remove_peer(&msg.0).await
	}
}

pub struct GetActivePeers;

impl Message for GetActivePeers {
	type Result = Vec<Peer>;
}

#[async_trait::async_trait]
impl Handler<GetActivePeers> for PeerDirectory {
	async fn handle(&mut self, _: GetActivePeers, _: &mut Context<Self>) -> Vec<Peer> {
		self.active_peers()
	}
}

pub struct GetPeersByRole(pub Role);

impl Message for GetPeersByRole {
	type Result = Vec<Peer>;
}

#[async_trait::async_trait]
impl Handler<GetPeersByRole> for PeerDirectory {
	async fn handle(&mut self, msg: GetPeersByRole, _: &mut Context<Self>) -> Vec<Peer> {
		self.peers.values().filter(|p| p.role == msg.0).cloned().collect()
	}
}

pub struct GetPeer(pub NodeId);

impl Message for GetPeer {
	type Result = Option<Peer>;
}

#[async_trait::async_trait]
impl Handler<GetPeer> for PeerDirectory {
	async fn handle(&mut self, msg: GetPeer, _: &mut Context<Self>) -> Option<Peer> {
		self.peers.get(&msg.0).cloned()
	}
}

pub struct UpdatePeerMetrics {
	pub node_id: NodeId,
	pub work_credits: f64,
	pub uptime_percentage: f64,
}

impl Message for UpdatePeerMetrics {
	type Result = Result<()>;
}

#[async_trait::async_trait]
impl Handler<UpdatePeerMetrics> for PeerDirectory {
	async fn handle(&mut self, msg: UpdatePeerMetrics, _: &mut Context<Self>) -> Result<()> {
		if let Some(peer) = self.peers.get_mut(&msg.node_id) {
			peer.work_credits = msg.work_credits;
			peer.uptime_percentage = msg.uptime_percentage;
			peer.last_seen = Utc::now();
			let snapshot = peer.clone();
			self.save(&snapshot).await?;
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Handler<Die> for PeerDirectory {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
