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

//! A member of the choir owns a single pitch and rings it whenever the conductor cues it.
//!
//! Each member runs its own worker thread. The worker blocks on a condvar until the conductor
//! places a duration in the member's one-slot mailbox, writes the pitch's samples and the
//! damping silence to the shared sink, and goes back to waiting.

use std::{io, sync::Arc, thread, time::Duration};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, span, warn, Level};

use crate::{
    audio::{AudioError, Sink},
    notes::{NoteCatalog, Pitch},
};

/// The lifecycle of a member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberState {
    /// Created, but the worker isn't running yet.
    Idle,
    /// The worker is blocked waiting for a cue.
    WaitingForCue,
    /// A cue has been delivered and the worker is ringing it.
    Playing,
    /// Terminal.
    Stopped,
}

/// Errors returned to the conductor by a member.
#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("member {0} was cued before it was started")]
    NotStarted(Pitch),

    #[error("member {0} was cued while it was still playing")]
    AlreadyPlaying(Pitch),

    #[error("member {0} has been stopped")]
    Stopped(Pitch),

    #[error("member {0} was cancelled")]
    Cancelled(Pitch),

    #[error("unable to start member {pitch}: {source}")]
    Spawn {
        pitch: Pitch,
        #[source]
        source: io::Error,
    },
}

/// Things that happen on a member's worker thread that the conductor needs to hear about.
#[derive(Debug)]
pub enum MemberEvent {
    /// The worker's wait was interrupted and it exited early.
    Cancelled { pitch: Pitch },
    /// The worker couldn't write to the sink and exited.
    WriteFailed { pitch: Pitch, error: AudioError },
}

/// The state and mailbox, only ever touched while holding the lock.
struct Cue {
    state: MemberState,
    pending: Option<Duration>,
    interrupted: bool,
}

struct Shared {
    cue: Mutex<Cue>,
    condvar: Condvar,
}

/// Everything the worker thread needs to ring its pitch.
struct Voice {
    pitch: Pitch,
    catalog: Arc<NoteCatalog>,
    sink: Arc<dyn Sink>,
    /// When present, writes to the sink are serialized through this lock.
    output_lock: Option<Arc<Mutex<()>>>,
}

impl Voice {
    /// Writes the truncated sample followed by the damping silence.
    fn ring(&self, duration: Duration) -> Result<(), AudioError> {
        let _output = self.output_lock.as_ref().map(|lock| lock.lock());

        self.sink.write(self.catalog.sample(self.pitch, duration))?;
        self.sink.write(self.catalog.silence())?;
        Ok(())
    }
}

/// A member of the choir.
pub struct Member {
    pitch: Pitch,
    shared: Arc<Shared>,
    voice: Option<Voice>,
    events_tx: Sender<MemberEvent>,
    join: Option<thread::JoinHandle<()>>,
}

impl Member {
    /// Creates a new member. The member doesn't do anything until it's started.
    pub fn new(
        pitch: Pitch,
        catalog: Arc<NoteCatalog>,
        sink: Arc<dyn Sink>,
        output_lock: Option<Arc<Mutex<()>>>,
        events_tx: Sender<MemberEvent>,
    ) -> Member {
        Member {
            pitch,
            shared: Arc::new(Shared {
                cue: Mutex::new(Cue {
                    state: MemberState::Idle,
                    pending: None,
                    interrupted: false,
                }),
                condvar: Condvar::new(),
            }),
            voice: Some(Voice {
                pitch,
                catalog,
                sink,
                output_lock,
            }),
            events_tx,
            join: None,
        }
    }

    /// The current state of the member.
    pub fn state(&self) -> MemberState {
        self.shared.cue.lock().state
    }

    /// Starts the worker thread. The worker waits for its first cue. Starting twice is a no-op.
    pub fn start(&mut self) -> Result<(), MemberError> {
        let voice = match self.voice.take() {
            Some(voice) => voice,
            None => return Ok(()),
        };

        self.shared.cue.lock().state = MemberState::WaitingForCue;

        let shared = self.shared.clone();
        let events_tx = self.events_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("member-{}", self.pitch))
            .spawn(move || Member::run(voice, shared, events_tx));

        match spawned {
            Ok(join) => {
                self.join = Some(join);
                Ok(())
            }
            Err(source) => {
                self.shared.cue.lock().state = MemberState::Stopped;
                Err(MemberError::Spawn {
                    pitch: self.pitch,
                    source,
                })
            }
        }
    }

    /// Hands the member a note to ring for the given duration. Returns as soon as the cue is
    /// delivered, without waiting for the note to be written.
    pub fn cue(&self, duration: Duration) -> Result<(), MemberError> {
        let mut cue = self.shared.cue.lock();
        if cue.interrupted {
            return Err(MemberError::Cancelled(self.pitch));
        }
        match cue.state {
            MemberState::Idle => Err(MemberError::NotStarted(self.pitch)),
            MemberState::Playing => Err(MemberError::AlreadyPlaying(self.pitch)),
            MemberState::Stopped => Err(MemberError::Stopped(self.pitch)),
            MemberState::WaitingForCue => {
                cue.pending = Some(duration);
                cue.state = MemberState::Playing;
                self.shared.condvar.notify_all();
                Ok(())
            }
        }
    }

    /// Stops the member. A note that is already being written is finished first, a cue that
    /// hasn't been picked up yet is dropped. Safe to call from any state, any number of times.
    pub fn stop(&self) {
        let mut cue = self.shared.cue.lock();
        cue.state = MemberState::Stopped;
        cue.pending = None;
        self.shared.condvar.notify_all();
    }

    /// Interrupts the worker's wait. The worker treats this as a cancellation and exits
    /// without ringing anything further.
    pub fn interrupt(&self) {
        let mut cue = self.shared.cue.lock();
        if cue.state != MemberState::Stopped {
            cue.interrupted = true;
            self.shared.condvar.notify_all();
        }
    }

    /// Blocks until the member has finished ringing its last cue. Returns immediately if the
    /// member isn't playing.
    pub fn wait_idle(&self) {
        let mut cue = self.shared.cue.lock();
        while cue.state == MemberState::Playing {
            self.shared.condvar.wait(&mut cue);
        }
    }

    /// Waits for the worker thread to exit. Only returns promptly after stop or interrupt.
    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!(pitch = %self.pitch, "Member worker panicked");
            }
        }
    }

    fn run(voice: Voice, shared: Arc<Shared>, events_tx: Sender<MemberEvent>) {
        let span = span!(Level::INFO, "member", pitch = %voice.pitch);
        let _enter = span.enter();

        debug!("Waiting for cues.");
        loop {
            let duration = {
                let mut cue = shared.cue.lock();
                while cue.pending.is_none() && cue.state != MemberState::Stopped && !cue.interrupted
                {
                    shared.condvar.wait(&mut cue);
                }

                if cue.interrupted {
                    cue.state = MemberState::Stopped;
                    cue.pending = None;
                    shared.condvar.notify_all();
                    warn!("Worker cancellation, member exiting early.");
                    let _ = events_tx.send(MemberEvent::Cancelled { pitch: voice.pitch });
                    return;
                }
                if cue.state == MemberState::Stopped {
                    debug!("Member stopped.");
                    return;
                }
                match cue.pending.take() {
                    Some(duration) => duration,
                    None => continue,
                }
            };

            info!(length = ?duration, "Ringing.");
            let result = voice.ring(duration);

            let mut cue = shared.cue.lock();
            if let Err(error) = result {
                error!(err = %error, "Unable to write to the audio sink.");
                cue.state = MemberState::Stopped;
                shared.condvar.notify_all();
                let _ = events_tx.send(MemberEvent::WriteFailed {
                    pitch: voice.pitch,
                    error,
                });
                return;
            }
            if cue.state == MemberState::Playing {
                cue.state = MemberState::WaitingForCue;
            }
            shared.condvar.notify_all();
        }
    }
}

impl Drop for Member {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
