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
use std::{path::PathBuf, time::Duration};

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::notes::{DEFAULT_DAMPING_SAMPLES, DEFAULT_MEASURE_LENGTH, DEFAULT_SAMPLE_RATE};

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_PLAYBACK_DELAY: Duration = Duration::ZERO;
const DEFAULT_SONGS: &str = "songs";

/// A YAML representation of the player configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Player {
    /// The audio device: `mock`, `wav:<path>`, `default` or a device name.
    device: Option<String>,

    /// Sample rate in Hz (default: 49152)
    sample_rate: Option<u32>,

    /// The length of a measure, which is also the longest a note rings (default: 1s)
    measure_length: Option<String>,

    /// Silent samples written after every note (default: 50)
    damping_samples: Option<usize>,

    /// Controls how long to wait after the sink starts before the first note.
    playback_delay: Option<String>,

    /// Serialize member writes with a lock rather than relying on note pacing (default: false)
    exclusive_output: Option<bool>,

    /// The directory holding song files (default: songs)
    songs: Option<String>,
}

impl Player {
    /// Returns the audio device from the configuration.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Overrides the audio device.
    pub fn set_device(&mut self, device: &str) {
        self.device = Some(device.to_string());
    }

    /// Returns the sample rate (default: 49152)
    pub fn sample_rate(&self) -> Result<u32, ConfigError> {
        match self.sample_rate {
            Some(0) => Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: "must be greater than 0".to_string(),
            }),
            Some(sample_rate) => Ok(sample_rate),
            None => Ok(DEFAULT_SAMPLE_RATE),
        }
    }

    /// Returns the measure length (default: 1s)
    pub fn measure_length(&self) -> Result<Duration, ConfigError> {
        let measure_length = parse_duration("measure_length", &self.measure_length)?
            .unwrap_or(DEFAULT_MEASURE_LENGTH);
        if measure_length.is_zero() {
            return Err(ConfigError::Invalid {
                field: "measure_length",
                reason: "must be longer than zero".to_string(),
            });
        }
        Ok(measure_length)
    }

    /// Returns the number of damping samples (default: 50)
    pub fn damping_samples(&self) -> usize {
        self.damping_samples.unwrap_or(DEFAULT_DAMPING_SAMPLES)
    }

    /// Returns the playback delay from the configuration.
    pub fn playback_delay(&self) -> Result<Duration, ConfigError> {
        Ok(parse_duration("playback_delay", &self.playback_delay)?
            .unwrap_or(DEFAULT_PLAYBACK_DELAY))
    }

    /// Returns true if member writes should be serialized.
    pub fn exclusive_output(&self) -> bool {
        self.exclusive_output.unwrap_or(false)
    }

    /// Overrides whether member writes are serialized.
    pub fn set_exclusive_output(&mut self, exclusive_output: bool) {
        self.exclusive_output = Some(exclusive_output);
    }

    /// Returns the song directory.
    pub fn songs(&self) -> PathBuf {
        PathBuf::from(self.songs.as_deref().unwrap_or(DEFAULT_SONGS))
    }
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
) -> Result<Option<Duration>, ConfigError> {
    value
        .as_ref()
        .map(|value| {
            DurationString::from_string(value.clone())
                .map(Duration::from)
                .map_err(|e| ConfigError::Invalid {
                    field,
                    reason: e.to_string(),
                })
        })
        .transpose()
}
