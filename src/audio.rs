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
use std::{error::Error, fmt, ops::Deref, path::PathBuf, sync::Arc};

use tracing::{debug, error};

pub mod cpal;
pub mod mock;
pub mod wav;

/// Prefix used to select the WAV file sink, e.g. `wav:/tmp/out.wav`.
const WAV_PREFIX: &str = "wav:";

/// The format written to a sink. Samples are always signed 8-bit mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl Format {
    pub const BITS_PER_SAMPLE: u16 = 8;
    pub const CHANNELS: u16 = 1;

    pub fn new(sample_rate: u32) -> Format {
        Format { sample_rate }
    }
}

/// Errors raised by audio devices and sinks.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio device {device} is unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("error writing to audio device: {0}")]
    Write(String),

    #[error("the audio sink is closed")]
    Closed,
}

impl AudioError {
    pub(crate) fn unavailable(device: &str, reason: impl fmt::Display) -> AudioError {
        AudioError::DeviceUnavailable {
            device: device.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// An output device that can be opened into a sink.
pub trait Device: fmt::Display + Send + Sync {
    /// Opens the device for the given format. Failing to open is a DeviceUnavailable error.
    fn open(&self, format: Format) -> Result<Arc<dyn Sink>, AudioError>;
}

/// A shared, write-only, append-ordered audio output. Every member of the choir writes into
/// the same sink. The sink itself doesn't serialize writers.
pub trait Sink: Send + Sync {
    /// Starts the sink. Samples written before this are buffered.
    fn start(&self) -> Result<(), AudioError>;

    /// Appends samples to the sink. Returns the number of samples written. May block while the
    /// sink's buffer is full.
    fn write(&self, samples: &[i8]) -> Result<usize, AudioError>;

    /// Blocks until all buffered samples have been played.
    fn drain(&self) -> Result<(), AudioError>;

    /// Closes the sink. Must be idempotent.
    fn close(&self);
}

/// Holds an open sink and closes it when dropped, so the sink is released on every exit path.
pub struct SinkGuard {
    sink: Arc<dyn Sink>,
}

impl SinkGuard {
    /// Opens and starts a sink on the device.
    pub fn acquire(device: &dyn Device, format: Format) -> Result<SinkGuard, AudioError> {
        let guard = SinkGuard {
            sink: device.open(format)?,
        };
        guard.sink.start()?;
        debug!(device = %device, sample_rate = format.sample_rate, "Acquired audio sink.");
        Ok(guard)
    }

    /// Returns a shared handle to the sink for writers.
    pub fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone()
    }
}

impl Deref for SinkGuard {
    type Target = dyn Sink;

    fn deref(&self) -> &Self::Target {
        self.sink.as_ref()
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.sink.close();
        debug!("Released audio sink.");
    }
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device with the given name. `mock` devices don't produce sound, `wav:<path>` writes
/// the output to a WAV file and anything else is looked up through cpal.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, AudioError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    }

    if let Some(path) = name.strip_prefix(WAV_PREFIX) {
        if path.is_empty() {
            return Err(AudioError::unavailable(name, "no WAV file path given"));
        }
        return Ok(Arc::new(wav::Device::new(PathBuf::from(path))));
    }

    match cpal::Device::get(name) {
        Ok(device) => Ok(Arc::new(device)),
        Err(e) => {
            error!(device = name, err = %e, "Unable to find audio device");
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_get_device() -> Result<(), Box<dyn Error>> {
        let device = get_device("mock-device")?;
        assert_eq!("mock-device (Mock)", device.to_string());

        let device = get_device("wav:/tmp/bellchoir.wav")?;
        assert_eq!("/tmp/bellchoir.wav (WAV)", device.to_string());

        assert!(matches!(
            get_device("wav:"),
            Err(AudioError::DeviceUnavailable { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_sink_guard_closes() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        {
            let guard = SinkGuard::acquire(&device, Format::new(1000))?;
            guard.write(&[1, 2, 3])?;
            assert!(device.state().is_started());
            assert!(!device.state().is_closed());
        }
        assert!(device.state().is_closed());
        Ok(())
    }

    #[test]
    fn test_sink_guard_open_failure() {
        let device = mock::Device::get("mock");
        device.fail_open();
        assert!(matches!(
            SinkGuard::acquire(&device, Format::new(1000)),
            Err(AudioError::DeviceUnavailable { .. })
        ));
        assert!(!device.state().is_started());
    }
}
