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

//! logging

use std::{io, path::PathBuf};

use fern::colors::{Color, ColoredLevelConfig};

/// Data directory for logs and scratch state.
pub fn coordinator_dir() -> io::Result<PathBuf> {
	let base_dirs = dirs::BaseDirs::new()
		.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
	let mut path = base_dirs.data_local_dir().to_path_buf();
	path.push("overlay_coordinator");
	Ok(path)
}

pub fn init(std: log::LevelFilter, file: log::LevelFilter) -> io::Result<()> {
	let colors = ColoredLevelConfig::new()
		.info(Color::Green)
		.warn(Color::Yellow)
		.error(Color::Red)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	let mut log_dir = coordinator_dir()?;
	std::fs::create_dir_all(log_dir.as_path())?;
	log_dir.push("coordinator.logs");

	let stdout_dispatcher = fern::Dispatch::new()
		.level_for("overlay_coordinator", std)
		.level_for("coordinator_store", std)
		.level_for("sqlx", log::LevelFilter::Error)
		.level_for("reqwest", log::LevelFilter::Warn)
		.level_for("hyper", log::LevelFilter::Warn)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {} {}",
				chrono::Local::now().format("[%H:%M]"),
				colors.color(record.level()),
				message,
			))
		})
		.chain(fern::Dispatch::new().level(std).chain(std::io::stdout()));

	let file_dispatcher = fern::Dispatch::new()
		.level(file)
		.level_for("overlay_coordinator", file)
		.level_for("coordinator_store", file)
		.level_for("sqlx", log::LevelFilter::Warn)
		.level_for("reqwest", log::LevelFilter::Warn)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}][{}] {}",
				chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
				record.target(),
				record.level(),
				message,
			))
		})
		.chain(fern::log_file(log_dir).expect("Failed to create coordinator.logs file"));

	fern::Dispatch::new().chain(stdout_dispatcher).chain(file_dispatcher).apply().expect("Could not init logging");
	Ok(())
}
