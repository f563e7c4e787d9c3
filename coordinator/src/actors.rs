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

//! Main entrypoint for the coordination plane. `System` spawns one actor
//! per subsystem on its own runtime thread and supervises their lifetime;
//! `drive` starts them, `shutdown` delivers `Die` to each and joins.

pub mod workers;

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde::Deserialize;
use xtra::{prelude::*, spawn::Tokio, Disconnected};

use coordinator_common::{NodeId, Role};
use coordinator_store::{Store, StoreConfig};

use self::workers::{
	credits::{CreditsConfig, RecordUptimeBeacon},
	flags::FlagConfig,
	governance::GovernanceConfig,
	operator_sync::OperatorSyncConfig,
	payouts::PayoutsConfig,
	peers::PeerConfig,
	placer::PlacerConfig,
	pools::PoolsConfig,
	poot::PootConfig,
	registration::RegistrationConfig,
	shard_manager::ShardManagerConfig,
	FlagEngine, GovernanceEngine, OperatorSyncEngine, PayoutBatcher, PeerDirectory, PoolCoordinator,
	PootValidator, RegistrationProtocol, ShardManager, ShardPlacer, WorkCreditsEngine,
};
use crate::{
	error::Result,
	overlay::OverlayApi,
	valuenet::ValueNetwork,
};

/// Stop message every worker handles by leaving its mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Die;

impl Message for Die {
	type Result = ();
}

/// Drive an actor with a periodic message. The task ends on its own once
/// the actor stops accepting mail.
pub(crate) fn spawn_ticker<A, M, F>(addr: Address<A>, every: Duration, make: F)
where
	A: Actor + Handler<M>,
	M: Message<Result = ()>,
	F: Fn() -> M + Send + 'static,
{
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(every);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			if addr.send(make()).await.is_err() {
				break;
			}
		}
	});
}

/// This daemon's identity on the overlay.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeIdentity {
	pub node_id: NodeId,
	pub onion_address: String,
	pub port: u16,
	pub role: Role,
}

/// Per-subsystem tuning, all defaulted; the binary overlays TOML on top.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ControlConfig {
	#[serde(default)]
	pub peers: PeerConfig,
	#[serde(default)]
	pub credits: CreditsConfig,
	#[serde(default)]
	pub poot: PootConfig,
	#[serde(default)]
	pub flags: FlagConfig,
	#[serde(default)]
	pub governance: GovernanceConfig,
	#[serde(default)]
	pub pools: PoolsConfig,
	#[serde(default)]
	pub registration: RegistrationConfig,
	#[serde(default)]
	pub placer: PlacerConfig,
	#[serde(default)]
	pub shard_manager: ShardManagerConfig,
	#[serde(default)]
	pub operator_sync: OperatorSyncConfig,
	#[serde(default)]
	pub payouts: PayoutsConfig,
}

/// Everything the actors need, assembled by the daemon builder. The store
/// itself connects on the system's runtime thread.
pub struct SystemConfig {
	pub store_url: String,
	pub store_config: StoreConfig,
	pub overlay: Arc<dyn OverlayApi>,
	pub value_network: Arc<dyn ValueNetwork>,
	pub identity: NodeIdentity,
	pub control: ControlConfig,
}

impl Clone for SystemConfig {
	fn clone(&self) -> Self {
		Self {
			store_url: self.store_url.clone(),
			store_config: self.store_config.clone(),
			overlay: Arc::clone(&self.overlay),
			value_network: Arc::clone(&self.value_network),
			identity: self.identity.clone(),
			control: self.control.clone(),
		}
	}
}

/// Addresses of every running subsystem actor.
pub struct Actors {
	pub peers: Address<PeerDirectory>,
	pub credits: Address<WorkCreditsEngine>,
	pub poot: Address<PootValidator>,
	pub flags: Address<FlagEngine>,
	pub governance: Address<GovernanceEngine>,
	pub operator_sync: Address<OperatorSyncEngine>,
	pub pools: Address<PoolCoordinator>,
	pub registration: Address<RegistrationProtocol>,
	pub placer: Address<ShardPlacer>,
	pub shard_manager: Address<ShardManager>,
	pub payouts: Address<PayoutBatcher>,
}

/// Control the execution of the coordination plane. Exits on drop.
pub struct System {
	config: SystemConfig,
	start_tx: flume::Sender<()>,
	kill_tx: flume::Sender<()>,
	/// handle to the runtime thread the actors live on
	handle: jod_thread::JoinHandle<Result<()>>,
}

impl System {
	pub fn new(config: SystemConfig) -> Self {
		let (start_tx, kill_tx, handle) = Self::start(config.clone());
		Self { config, start_tx, kill_tx, handle }
	}

	/// Start the actors and begin driving their execution.
	pub fn drive(&self) {
		self.start_tx.send(()).expect("Could not start actors");
	}

	fn start(
		config: SystemConfig,
	) -> (flume::Sender<()>, flume::Sender<()>, jod_thread::JoinHandle<Result<()>>) {
		let (tx_start, rx_start) = flume::bounded(1);
		let (tx_kill, rx_kill) = flume::bounded(1);

		let handle = jod_thread::spawn(move || {
			// block until told to start
			let _ = rx_start.recv();
			let runtime = tokio::runtime::Runtime::new()?;
			runtime.block_on(Self::main_loop(config, rx_kill))?;
			Ok(())
		});

		(tx_start, tx_kill, handle)
	}

	async fn main_loop(config: SystemConfig, rx: flume::Receiver<()>) -> Result<()> {
		coordinator_store::migrate(&config.store_url).await?;
		let store = Store::connect(&config.store_url, config.store_config.clone()).await?;
		let actors = Self::spawn_actors(&config, store);

		// this node is its own first producer: a liveness beacon per slot
		let beacon_every =
			Duration::from_secs(config.control.credits.slot_duration_secs.max(1));
		let node_id = config.identity.node_id.clone();
		let credits = actors.credits.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(beacon_every);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				let beacon = RecordUptimeBeacon { node_id: node_id.clone(), pool_id: None };
				match credits.send(beacon).await {
					Ok(Err(e)) => log::debug!("own uptime beacon rejected: {}", e),
					Err(_) => break,
					_ => {}
				}
			}
		});

		// park until shutdown
		let _ = rx.recv_async().await;
		Self::kill_actors(actors).await;
		Ok(())
	}

	fn spawn_actors(config: &SystemConfig, store: Store) -> Actors {
		let control = &config.control;

		let peers = PeerDirectory::new(
			store.clone(),
			config.overlay.clone(),
			control.peers.clone(),
			config.identity.clone(),
		)
		.create(None)
		.spawn(&mut Tokio::Global);

		let credits = WorkCreditsEngine::new(store.clone(), control.credits.clone())
			.create(None)
			.spawn(&mut Tokio::Global);

		let poot =
			PootValidator::new(store.clone(), config.value_network.clone(), control.poot.clone())
				.create(None)
				.spawn(&mut Tokio::Global);

		let flags = FlagEngine::new(store.clone(), control.flags.clone())
			.create(None)
			.spawn(&mut Tokio::Global);

		let governance = GovernanceEngine::new(
			store.clone(),
			config.value_network.clone(),
			control.governance.clone(),
		)
		.create(None)
		.spawn(&mut Tokio::Global);

		let operator_sync = OperatorSyncEngine::new(
			store.clone(),
			control.operator_sync.clone(),
			config.identity.node_id.clone(),
		)
		.create(None)
		.spawn(&mut Tokio::Global);

		let pools =
			PoolCoordinator::new(store.clone(), control.pools.clone(), operator_sync.clone())
				.create(None)
				.spawn(&mut Tokio::Global);

		let registration = RegistrationProtocol::new(
			store.clone(),
			config.overlay.clone(),
			config.value_network.clone(),
			peers.clone(),
			control.registration.clone(),
		)
		.create(None)
		.spawn(&mut Tokio::Global);

		let placer = ShardPlacer::new(store.clone(), control.placer.clone())
			.create(None)
			.spawn(&mut Tokio::Global);

		let shard_manager = ShardManager::new(
			store.clone(),
			config.overlay.clone(),
			control.shard_manager.clone(),
		)
		.create(None)
		.spawn(&mut Tokio::Global);

		let payouts =
			PayoutBatcher::new(store, config.value_network.clone(), control.payouts.clone())
				.create(None)
				.spawn(&mut Tokio::Global);

		Actors {
			peers,
			credits,
			poot,
			flags,
			governance,
			operator_sync,
			pools,
			registration,
			placer,
			shard_manager,
			payouts,
		}
	}

	async fn kill_actors(actors: Actors) {
		let fut: Vec<BoxFuture<'_, Result<(), Disconnected>>> = vec![
			Box::pin(actors.peers.send(Die)),
			Box::pin(actors.credits.send(Die)),
			Box::pin(actors.poot.send(Die)),
			Box::pin(actors.flags.send(Die)),
			Box::pin(actors.governance.send(Die)),
			Box::pin(actors.pools.send(Die)),
			Box::pin(actors.registration.send(Die)),
			Box::pin(actors.placer.send(Die)),
			Box::pin(actors.shard_manager.send(Die)),
			Box::pin(actors.payouts.send(Die)),
			Box::pin(actors.operator_sync.send(Die)),
		];
		futures::future::join_all(fut).await;
	}

	pub fn context(&self) -> &SystemConfig {
		&self.config
	}

	/// Signal the runtime thread to stop and join it.
	pub fn shutdown(self) -> Result<()> {
		let _ = self.kill_tx.send(());
		self.handle.join()
	}

	pub fn boxed_shutdown(self: Box<Self>) -> Result<()> {
		let _ = self.kill_tx.send(());
		self.handle.join()
	}
}
