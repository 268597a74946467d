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
use std::{collections::HashMap, f64::consts::PI, fmt, str::FromStr, time::Duration};

/// The default sample rate, roughly 48kHz.
pub const DEFAULT_SAMPLE_RATE: u32 = 48 * 1024;

/// The default length of a measure. This is also the longest a single note can sound.
pub const DEFAULT_MEASURE_LENGTH: Duration = Duration::from_secs(1);

/// The default number of silent samples written after every note.
pub const DEFAULT_DAMPING_SAMPLES: usize = 50;

const FREQUENCY_A_HZ: f64 = 440.0;
const MAX_VOLUME: f64 = 127.0;

/// A pitch that a member of the choir can ring. REST is a pitch too, it just rings silence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pitch {
    Rest,
    A4,
    A4S,
    B4,
    C4,
    C4S,
    D4,
    D4S,
    E4,
    F4,
    F4S,
    G4,
    G4S,
    A5,
}

impl Pitch {
    /// Every pitch in the catalog, in half step order starting with REST.
    pub const ALL: [Pitch; 14] = [
        Pitch::Rest,
        Pitch::A4,
        Pitch::A4S,
        Pitch::B4,
        Pitch::C4,
        Pitch::C4S,
        Pitch::D4,
        Pitch::D4S,
        Pitch::E4,
        Pitch::F4,
        Pitch::F4S,
        Pitch::G4,
        Pitch::G4S,
        Pitch::A5,
    ];

    /// The symbol used for this pitch in song files.
    pub fn symbol(&self) -> &'static str {
        match self {
            Pitch::Rest => "REST",
            Pitch::A4 => "A4",
            Pitch::A4S => "A4S",
            Pitch::B4 => "B4",
            Pitch::C4 => "C4",
            Pitch::C4S => "C4S",
            Pitch::D4 => "D4",
            Pitch::D4S => "D4S",
            Pitch::E4 => "E4",
            Pitch::F4 => "F4",
            Pitch::F4S => "F4S",
            Pitch::G4 => "G4",
            Pitch::G4S => "G4S",
            Pitch::A5 => "A5",
        }
    }

    /// The frequency of the pitch in Hz. REST has no frequency.
    pub fn frequency(&self) -> Option<f64> {
        let half_steps_from_a = Pitch::ALL.iter().position(|pitch| pitch == self)?;
        if half_steps_from_a == 0 {
            return None;
        }

        let exp = (half_steps_from_a - 1) as f64 / 12.0;
        Some(FREQUENCY_A_HZ * 2.0_f64.powf(exp))
    }
}

impl FromStr for Pitch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pitch::ALL
            .iter()
            .find(|pitch| pitch.symbol() == s)
            .copied()
            .ok_or_else(|| format!("unknown pitch symbol {}", s))
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// The note catalog holds a precomputed sample buffer for every pitch. It is built once and
/// shared read-only between every member of the choir.
pub struct NoteCatalog {
    /// The sample rate the buffers were rendered at.
    sample_rate: u32,
    /// The length of a measure, which is also the length of each sample buffer.
    measure_length: Duration,
    /// One measure of signed 8-bit mono samples per pitch.
    samples: HashMap<Pitch, Vec<i8>>,
    /// The silence written after each note.
    silence: Vec<i8>,
}

impl NoteCatalog {
    /// Renders a new catalog.
    pub fn new(sample_rate: u32, measure_length: Duration, damping_samples: usize) -> NoteCatalog {
        let num_samples = samples_for(sample_rate, measure_length);
        let step_alpha = (2.0 * PI) / sample_rate as f64;

        let samples = Pitch::ALL
            .iter()
            .map(|pitch| {
                let buffer = match pitch.frequency() {
                    Some(frequency) => {
                        let sin_step = frequency * step_alpha;
                        (0..num_samples)
                            .map(|i| ((i as f64 * sin_step).sin() * MAX_VOLUME) as i8)
                            .collect()
                    }
                    None => vec![0; num_samples],
                };
                (*pitch, buffer)
            })
            .collect();

        NoteCatalog {
            sample_rate,
            measure_length,
            samples,
            silence: vec![0; damping_samples],
        }
    }

    /// The sample rate of the catalog.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The measure length of the catalog.
    pub fn measure_length(&self) -> Duration {
        self.measure_length
    }

    /// Returns the samples for the pitch, truncated to the given duration. Durations longer
    /// than a measure are capped at a measure.
    pub fn sample(&self, pitch: Pitch, duration: Duration) -> &[i8] {
        let buffer = self
            .samples
            .get(&pitch)
            .map(|buffer| buffer.as_slice())
            .unwrap_or_default();
        let length = samples_for(self.sample_rate, duration.min(self.measure_length));
        &buffer[..length.min(buffer.len())]
    }

    /// The silence buffer that damps each note.
    pub fn silence(&self) -> &[i8] {
        &self.silence
    }
}

impl Default for NoteCatalog {
    fn default() -> Self {
        NoteCatalog::new(
            DEFAULT_SAMPLE_RATE,
            DEFAULT_MEASURE_LENGTH,
            DEFAULT_DAMPING_SAMPLES,
        )
    }
}

/// The number of samples needed to cover the duration at the sample rate.
pub fn samples_for(sample_rate: u32, duration: Duration) -> usize {
    (sample_rate as u128 * duration.as_millis() / 1000) as usize
}
