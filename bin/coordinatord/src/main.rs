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

mod cli_opts;
mod config;

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use anyhow::Result;

use overlay_coordinator::{logger, store::StoreConfig, CoordinatorBuilder};

pub fn main() -> Result<()> {
	let config = config::Config::new()?;
	logger::init(config.cli().log_level(), log::LevelFilter::Debug)?;

	let store_config = StoreConfig { queue_writes: config.queue_writes(), ..StoreConfig::default() };
	let system = CoordinatorBuilder::default()
		.identity(config.identity())
		.pg_url(config.pg_url())
		.socks_proxy(config.socks_proxy())
		.tron_gateway(config.tron_gateway())
		.tron_api_key(config.tron_api_key())
		.store_config(store_config)
		.control(config.control())
		.build()?;
	system.drive();

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("Error setting Ctrl-C handler");
	while running.load(Ordering::SeqCst) {
		std::thread::sleep(std::time::Duration::from_millis(100));
	}

	system.shutdown()?;
	Ok(())
}
