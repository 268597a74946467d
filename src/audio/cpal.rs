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
use std::{collections::VecDeque, error::Error, fmt, sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use tracing::{error, info, span, Level};

use super::{AudioError, Format};

/// The name used to select the host's default output device.
const DEFAULT_DEVICE: &str = "default";

/// How much audio the sink buffers before writers block, in seconds.
const BUFFER_SECONDS: u32 = 1;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices with at least one output channel.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let output_configs = match device.supported_output_configs() {
                    Ok(output_configs) => output_configs,
                    Err(_) => continue,
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device. `default` selects the default host's default output.
    pub fn get(name: &str) -> Result<Device, AudioError> {
        if name == DEFAULT_DEVICE {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| AudioError::unavailable(name, "no default output device"))?;
            return Ok(Device {
                name: device
                    .name()
                    .unwrap_or_else(|_| DEFAULT_DEVICE.to_string()),
                max_channels: device
                    .default_output_config()
                    .map(|config| config.channels())
                    .unwrap_or(0),
                host_id: host.id(),
                device,
            });
        }

        let devices =
            Device::list_cpal_devices().map_err(|e| AudioError::unavailable(name, e))?;
        devices
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| AudioError::unavailable(name, "no device found with that name"))
    }
}

impl super::Device for Device {
    fn open(&self, format: Format) -> Result<Arc<dyn super::Sink>, AudioError> {
        let span = span!(Level::INFO, "open sink (cpal)");
        let _enter = span.enter();

        let sink = Sink::open(self.device.clone(), &self.name, format)?;
        Ok(Arc::new(sink))
    }
}

/// Samples waiting to be played along with the playback state.
struct Queue {
    samples: VecDeque<i8>,
    started: bool,
    closed: bool,
}

/// The buffer between the writers and the cpal callback. Writers block when it's full and
/// drain blocks until it's empty, much like a hardware line buffer.
struct Buffer {
    queue: Mutex<Queue>,
    capacity: usize,
    /// Signalled when space frees up or the buffer empties.
    changed: Condvar,
}

impl Buffer {
    fn new(capacity: usize) -> Buffer {
        Buffer {
            queue: Mutex::new(Queue {
                samples: VecDeque::with_capacity(capacity),
                started: false,
                closed: false,
            }),
            capacity,
            changed: Condvar::new(),
        }
    }

    /// Fills the output with buffered samples, resampling by nearest neighbour and copying the
    /// mono signal to every channel.
    fn fill<T: cpal::Sample + cpal::FromSample<f32>>(
        &self,
        data: &mut [T],
        channels: usize,
        step: f64,
        phase: &mut f64,
        current: &mut f32,
    ) {
        let mut queue = self.queue.lock();
        for frame in data.chunks_mut(channels.max(1)) {
            if queue.started {
                *phase += step;
                while *phase >= 1.0 {
                    *phase -= 1.0;
                    *current = match queue.samples.pop_front() {
                        Some(sample) => sample as f32 / 128.0,
                        None => 0.0,
                    };
                }
            } else {
                *current = 0.0;
            }

            for out in frame.iter_mut() {
                *out = T::from_sample(*current);
            }
        }
        drop(queue);
        self.changed.notify_all();
    }
}

/// A sink that plays through a cpal output stream.
struct Sink {
    buffer: Arc<Buffer>,
    /// Dropping this sender stops the output thread and with it the stream.
    shutdown_tx: Mutex<Option<crossbeam_channel::Sender<()>>>,
    output_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Sink {
    fn open(device: cpal::Device, name: &str, format: Format) -> Result<Sink, AudioError> {
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::unavailable(name, e))?;
        let sample_format = config.sample_format();
        let channels = config.channels() as usize;
        let step = format.sample_rate as f64 / config.sample_rate().0 as f64;
        let stream_config: cpal::StreamConfig = config.into();

        let buffer = Arc::new(Buffer::new(
            (format.sample_rate * BUFFER_SECONDS).max(1) as usize,
        ));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        // cpal streams can't always move between threads, so the stream lives on its own thread.
        let output_thread = {
            let buffer = buffer.clone();
            thread::Builder::new()
                .name("cpal-output".to_string())
                .spawn(move || {
                    let stream = match sample_format {
                        cpal::SampleFormat::F32 => {
                            build_stream::<f32>(&device, &stream_config, buffer, channels, step)
                        }
                        cpal::SampleFormat::I16 => {
                            build_stream::<i16>(&device, &stream_config, buffer, channels, step)
                        }
                        cpal::SampleFormat::I32 => {
                            build_stream::<i32>(&device, &stream_config, buffer, channels, step)
                        }
                        other => Err(format!("unsupported sample format {:?}", other)),
                    };

                    let stream = match stream.and_then(|stream| {
                        stream.play().map_err(|e| e.to_string())?;
                        Ok(stream)
                    }) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    info!("CPAL output stream started successfully");
                    let _ = ready_tx.send(Ok(()));

                    // Keep the stream alive until the sink closes.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                })
                .map_err(|e| AudioError::unavailable(name, e))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = output_thread.join();
                return Err(AudioError::unavailable(name, e));
            }
            Err(e) => {
                let _ = output_thread.join();
                return Err(AudioError::unavailable(name, e));
            }
        }

        Ok(Sink {
            buffer,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            output_thread: Mutex::new(Some(output_thread)),
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<Buffer>,
    channels: usize,
    step: f64,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut phase = 0.0;
    let mut current = 0.0;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                buffer.fill(data, channels, step, &mut phase, &mut current);
            },
            |err| error!("CPAL output stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

impl super::Sink for Sink {
    fn start(&self) -> Result<(), AudioError> {
        let mut queue = self.buffer.queue.lock();
        if queue.closed {
            return Err(AudioError::Closed);
        }
        queue.started = true;
        Ok(())
    }

    fn write(&self, samples: &[i8]) -> Result<usize, AudioError> {
        let mut written = 0;
        let mut queue = self.buffer.queue.lock();
        while written < samples.len() {
            if queue.closed {
                return Err(AudioError::Closed);
            }

            let space = self.buffer.capacity.saturating_sub(queue.samples.len());
            if space == 0 {
                self.buffer.changed.wait(&mut queue);
                continue;
            }

            let end = (written + space).min(samples.len());
            queue.samples.extend(&samples[written..end]);
            written = end;
        }
        Ok(written)
    }

    fn drain(&self) -> Result<(), AudioError> {
        let mut queue = self.buffer.queue.lock();
        while !queue.samples.is_empty() {
            if queue.closed {
                return Err(AudioError::Closed);
            }
            if !queue.started {
                return Err(AudioError::Write("sink drained before it was started".to_string()));
            }
            self.buffer.changed.wait(&mut queue);
        }
        Ok(())
    }

    fn close(&self) {
        {
            let mut queue = self.buffer.queue.lock();
            queue.closed = true;
            queue.samples.clear();
        }
        self.buffer.changed.notify_all();

        self.shutdown_tx.lock().take();
        if let Some(output_thread) = self.output_thread.lock().take() {
            if output_thread.join().is_err() {
                error!("Error while joining output thread");
            }
        }
    }
}
