// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{error::Error, path::Path, sync::Arc};

use config::{Config, File};
use tracing::info;

use crate::{audio, conductor::Conductor, notes::NoteCatalog};

mod error;
mod player;

pub use self::error::ConfigError;
pub use self::player::Player;

/// Reads the player configuration from a YAML file.
pub fn parse_player(path: &Path) -> Result<Player, ConfigError> {
    Ok(Config::builder()
        .add_source(File::from(path))
        .build()?
        .try_deserialize::<Player>()?)
}

/// Builds the conductor described by the player configuration. The note catalog is rendered
/// here, once, and shared with every play.
pub fn init_conductor(player: &Player) -> Result<Conductor, Box<dyn Error>> {
    let device = audio::get_device(player.device())?;
    let catalog = Arc::new(NoteCatalog::new(
        player.sample_rate()?,
        player.measure_length()?,
        player.damping_samples(),
    ));

    info!(
        device = %device,
        sample_rate = catalog.sample_rate(),
        measure_length = ?catalog.measure_length(),
        exclusive_output = player.exclusive_output(),
        "Initialized conductor."
    );

    Ok(Conductor::new(device, catalog)
        .with_playback_delay(player.playback_delay()?)
        .with_exclusive_output(player.exclusive_output()))
}
