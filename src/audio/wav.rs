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
use std::{
    fmt,
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::Arc,
};

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::{error, info};

use super::{AudioError, Format};

/// A device that renders everything written to it into a WAV file instead of a sound card.
pub struct Device {
    path: PathBuf,
}

impl Device {
    pub fn new(path: PathBuf) -> Device {
        Device { path }
    }
}

impl super::Device for Device {
    fn open(&self, format: Format) -> Result<Arc<dyn super::Sink>, AudioError> {
        let spec = WavSpec {
            channels: Format::CHANNELS,
            sample_rate: format.sample_rate,
            bits_per_sample: Format::BITS_PER_SAMPLE,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| AudioError::unavailable(&self.to_string(), e))?;

        info!(path = ?self.path, sample_rate = format.sample_rate, "Writing song to WAV file.");
        Ok(Arc::new(Sink {
            writer: Mutex::new(Some(writer)),
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (WAV)", self.path.display())
    }
}

struct Sink {
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl super::Sink for Sink {
    fn start(&self) -> Result<(), AudioError> {
        match self.writer.lock().as_ref() {
            Some(_) => Ok(()),
            None => Err(AudioError::Closed),
        }
    }

    fn write(&self, samples: &[i8]) -> Result<usize, AudioError> {
        let mut writer = self.writer.lock();
        let writer = writer.as_mut().ok_or(AudioError::Closed)?;

        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|e| AudioError::Write(e.to_string()))?;
        }
        Ok(samples.len())
    }

    fn drain(&self) -> Result<(), AudioError> {
        match self.writer.lock().as_mut() {
            Some(writer) => writer.flush().map_err(|e| AudioError::Write(e.to_string())),
            None => Err(AudioError::Closed),
        }
    }

    fn close(&self) {
        if let Some(writer) = self.writer.lock().take() {
            if let Err(e) = writer.finalize() {
                error!(err = %e, "Error finalizing WAV file");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, time::Duration};

    use crate::audio::{Device as _, Format};
    use crate::notes::{NoteCatalog, Pitch};

    use super::Device;

    #[test]
    fn test_wav_sink() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.wav");
        let catalog = NoteCatalog::new(8000, Duration::from_millis(100), 5);

        let device = Device::new(path.clone());
        let sink = device.open(Format::new(8000))?;
        sink.start()?;
        assert_eq!(800, sink.write(catalog.sample(Pitch::A4, Duration::from_millis(100)))?);
        assert_eq!(5, sink.write(catalog.silence())?);
        sink.drain()?;
        sink.close();
        sink.close();
        assert!(sink.write(catalog.silence()).is_err());

        let mut reader = hound::WavReader::open(&path)?;
        let spec = reader.spec();
        assert_eq!(1, spec.channels);
        assert_eq!(8000, spec.sample_rate);
        assert_eq!(8, spec.bits_per_sample);

        let samples = reader.samples::<i8>().collect::<Result<Vec<i8>, _>>()?;
        assert_eq!(805, samples.len());
        assert!(samples[800..].iter().all(|sample| *sample == 0));
        Ok(())
    }
}
