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
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{AudioError, Format};

/// A single write received by the mock sink.
#[derive(Clone, Debug)]
pub struct Write {
    /// The name of the thread that wrote the samples.
    pub writer: Option<String>,
    /// The number of samples written.
    pub len: usize,
    /// True if every sample was zero.
    pub silent: bool,
    /// When the write arrived.
    pub at: Instant,
}

/// Everything the mock sink has observed. Shared between the device and every sink it opens so
/// tests can inspect it after playback.
#[derive(Default)]
pub struct State {
    format: Mutex<Option<Format>>,
    writes: Mutex<Vec<Write>>,
    started: AtomicBool,
    drained_at: Mutex<Option<Instant>>,
    closed: AtomicBool,
    /// Set once the sink has been dropped by everything holding it.
    released: AtomicBool,
    active_writers: AtomicUsize,
    max_active_writers: AtomicUsize,
}

impl State {
    /// Clears everything recorded by a previous sink.
    fn reset(&self, format: Format) {
        *self.format.lock() = Some(format);
        self.writes.lock().clear();
        self.started.store(false, Ordering::Relaxed);
        *self.drained_at.lock() = None;
        self.closed.store(false, Ordering::Relaxed);
        self.released.store(false, Ordering::Relaxed);
        self.max_active_writers.store(0, Ordering::SeqCst);
    }

    /// The format the sink was opened with.
    pub fn format(&self) -> Option<Format> {
        *self.format.lock()
    }

    /// Every write received so far, in arrival order.
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    pub fn is_drained(&self) -> bool {
        self.drained_at.lock().is_some()
    }

    /// When the sink was last drained.
    pub fn drained_at(&self) -> Option<Instant> {
        *self.drained_at.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// True once the guard and every member writing to the sink have let go of it.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    /// The most writers ever observed inside write at the same time.
    pub fn max_active_writers(&self) -> usize {
        self.max_active_writers.load(Ordering::SeqCst)
    }
}

/// A mock device. Doesn't actually play anything, but records what it was asked to play.
#[derive(Clone)]
pub struct Device {
    name: String,
    state: Arc<State>,
    fail_open: Arc<AtomicBool>,
    /// Fail every write after this many successful writes.
    fail_writes_after: Arc<Mutex<Option<usize>>>,
    /// How long each write takes, to simulate a device that blocks.
    write_latency: Arc<Mutex<Duration>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            state: Arc::new(State::default()),
            fail_open: Arc::new(AtomicBool::new(false)),
            fail_writes_after: Arc::new(Mutex::new(None)),
            write_latency: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// The state shared with every sink this device opens.
    pub fn state(&self) -> Arc<State> {
        self.state.clone()
    }

    /// Makes the next open fail as if the device were unavailable.
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::Relaxed);
    }

    /// Makes writes fail once the given number of writes have succeeded.
    pub fn fail_writes_after(&self, writes: usize) {
        *self.fail_writes_after.lock() = Some(writes);
    }

    /// Makes every write take the given amount of time.
    pub fn set_write_latency(&self, latency: Duration) {
        *self.write_latency.lock() = latency;
    }
}

impl super::Device for Device {
    fn open(&self, format: Format) -> Result<Arc<dyn super::Sink>, AudioError> {
        let span = span!(Level::INFO, "open sink (mock)");
        let _enter = span.enter();

        if self.fail_open.load(Ordering::Relaxed) {
            return Err(AudioError::unavailable(&self.name, "mock device set to fail"));
        }

        info!(
            device = self.name,
            sample_rate = format.sample_rate,
            "Opened mock sink."
        );
        self.state.reset(format);

        Ok(Arc::new(Sink {
            state: self.state.clone(),
            fail_writes_after: *self.fail_writes_after.lock(),
            write_latency: *self.write_latency.lock(),
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

struct Sink {
    state: Arc<State>,
    fail_writes_after: Option<usize>,
    write_latency: Duration,
}

impl super::Sink for Sink {
    fn start(&self) -> Result<(), AudioError> {
        if self.state.is_closed() {
            return Err(AudioError::Closed);
        }
        self.state.started.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, samples: &[i8]) -> Result<usize, AudioError> {
        if self.state.is_closed() {
            return Err(AudioError::Closed);
        }

        let active = self.state.active_writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_active_writers
            .fetch_max(active, Ordering::SeqCst);

        if !self.write_latency.is_zero() {
            thread::sleep(self.write_latency);
        }

        let result = {
            let mut writes = self.state.writes.lock();
            match self.fail_writes_after {
                Some(limit) if writes.len() >= limit => {
                    Err(AudioError::Write("mock device set to fail".to_string()))
                }
                _ => {
                    writes.push(Write {
                        writer: thread::current().name().map(|name| name.to_string()),
                        len: samples.len(),
                        silent: samples.iter().all(|sample| *sample == 0),
                        at: Instant::now(),
                    });
                    Ok(samples.len())
                }
            }
        };

        self.state.active_writers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn drain(&self) -> Result<(), AudioError> {
        *self.state.drained_at.lock() = Some(Instant::now());
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::Relaxed);
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.state.released.store(true, Ordering::Relaxed);
    }
}
