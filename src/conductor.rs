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
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level, Span};

use crate::{
    audio::{self, AudioError, Format, SinkGuard},
    member::{Member, MemberError, MemberEvent},
    notes::{NoteCatalog, Pitch},
    playsync::CancelHandle,
    songs::{LoadError, Song},
};

/// The outcome of loading a song. An unplayable session keeps the reason so it can be reported
/// when someone tries to play it.
#[derive(Debug)]
pub enum Session {
    Playable(Arc<Song>),
    Unplayable { path: String, error: LoadError },
}

impl Session {
    pub fn is_playable(&self) -> bool {
        matches!(self, Session::Playable(_))
    }
}

/// Errors that end a play.
#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    #[error("{song} can't be played: {reason}")]
    Unplayable { song: String, reason: String },

    #[error(transparent)]
    DeviceUnavailable(AudioError),

    #[error("audio output failed: {error}")]
    Output {
        pitch: Option<Pitch>,
        error: AudioError,
    },

    #[error(transparent)]
    Worker(#[from] MemberError),
}

/// A summary of a finished play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayReport {
    /// The name of the song.
    pub song: String,
    /// The number of members created, one per distinct pitch.
    pub members: usize,
    /// Notes delivered to a member.
    pub notes_cued: usize,
    /// Notes a member refused, because it was still playing or had been cancelled.
    pub notes_skipped: usize,
    /// True if the play was cancelled before the song finished.
    pub cancelled: bool,
    /// Wall clock time spent playing.
    pub elapsed: Duration,
}

/// The members for a single play, one per pitch. Dropping the choir stops and joins every
/// member, so no worker outlives the play that created it.
struct Choir {
    members: Vec<Member>,
    by_pitch: HashMap<Pitch, usize>,
}

impl Choir {
    /// Creates and starts a member for every distinct pitch in the song, in first-seen order.
    fn assemble(
        song: &Song,
        catalog: &Arc<NoteCatalog>,
        sink: &SinkGuard,
        output_lock: Option<Arc<Mutex<()>>>,
        events_tx: &Sender<MemberEvent>,
    ) -> Result<Choir, MemberError> {
        let mut choir = Choir {
            members: Vec::new(),
            by_pitch: HashMap::new(),
        };

        for pitch in song.pitches() {
            let mut member = Member::new(
                pitch,
                catalog.clone(),
                sink.sink(),
                output_lock.clone(),
                events_tx.clone(),
            );
            member.start()?;
            choir.by_pitch.insert(pitch, choir.members.len());
            choir.members.push(member);
        }

        Ok(choir)
    }

    fn get(&self, pitch: Pitch) -> Option<&Member> {
        self.by_pitch
            .get(&pitch)
            .and_then(|index| self.members.get(*index))
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    /// Waits for every member to finish the note it's ringing.
    fn wait_idle(&self) {
        self.members.iter().for_each(|member| member.wait_idle());
    }

    /// Stops every member and waits for the workers to exit.
    fn dismiss(&mut self) {
        self.members.iter().for_each(|member| member.stop());
        self.members.iter_mut().for_each(|member| member.join());
    }
}

impl Drop for Choir {
    fn drop(&mut self) {
        self.dismiss();
    }
}

/// The conductor reads songs and plays them by cueing one member per pitch.
pub struct Conductor {
    /// The device members write into.
    device: Arc<dyn audio::Device>,
    /// The sample buffers for every pitch.
    catalog: Arc<NoteCatalog>,
    /// How long to wait after starting the sink before the first cue.
    playback_delay: Duration,
    /// When true, writes to the sink are serialized through a lock instead of relying on the
    /// pacing between cues.
    exclusive_output: bool,
    /// Cancels the current play.
    cancel_handle: CancelHandle,
    /// The logging span.
    span: Span,
}

impl Conductor {
    /// Creates a new conductor.
    pub fn new(device: Arc<dyn audio::Device>, catalog: Arc<NoteCatalog>) -> Conductor {
        Conductor {
            device,
            catalog,
            playback_delay: Duration::ZERO,
            exclusive_output: false,
            cancel_handle: CancelHandle::new(),
            span: span!(Level::INFO, "conductor"),
        }
    }

    /// Sets the delay between starting the sink and the first cue.
    pub fn with_playback_delay(mut self, playback_delay: Duration) -> Conductor {
        self.playback_delay = playback_delay;
        self
    }

    /// Serializes member writes to the sink with a lock.
    pub fn with_exclusive_output(mut self, exclusive_output: bool) -> Conductor {
        self.exclusive_output = exclusive_output;
        self
    }

    /// A handle that cancels the play in progress. A cancel that arrives between plays cancels
    /// the next one. The handle is reset whenever a play returns.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// The note catalog used by this conductor.
    pub fn catalog(&self) -> Arc<NoteCatalog> {
        self.catalog.clone()
    }

    /// Loads a song file. A song that fails to load produces an unplayable session rather than
    /// an error, so a selection loop can carry on.
    pub fn load_song(&self, path: &Path) -> Session {
        let _enter = self.span.enter();

        match Song::load(path) {
            Ok(song) => {
                info!(song = %song, "Loaded song.");
                Session::Playable(Arc::new(song))
            }
            Err(error) => {
                error!(path = ?path, err = %error, "Unable to load song.");
                Session::Unplayable {
                    path: path.display().to_string(),
                    error,
                }
            }
        }
    }

    /// Plays the session's song. Reports the load error instead if the session is unplayable.
    pub fn play(&self, session: &Session) -> Result<PlayReport, PlayError> {
        match session {
            Session::Playable(song) => self.play_song(song),
            Session::Unplayable { path, error } => {
                let _enter = self.span.enter();
                error!(path, err = %error, "Song can't be played, try a different song.");
                Err(PlayError::Unplayable {
                    song: path.clone(),
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Plays the song. Returns once every member has been stopped and the sink released.
    pub fn play_song(&self, song: &Song) -> Result<PlayReport, PlayError> {
        let _enter = self.span.enter();
        let result = self.perform(song);
        self.cancel_handle.reset();
        result
    }

    fn perform(&self, song: &Song) -> Result<PlayReport, PlayError> {
        let start = Instant::now();

        let measure_length = self.catalog.measure_length();
        info!(
            device = %self.device,
            song = %song,
            duration = ?song.duration(measure_length),
            "Playing song."
        );

        let sink = SinkGuard::acquire(
            self.device.as_ref(),
            Format::new(self.catalog.sample_rate()),
        )
        .map_err(PlayError::DeviceUnavailable)?;

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let output_lock = self.exclusive_output.then(|| Arc::new(Mutex::new(())));

        // Declared after the sink so the members are dismissed before the sink is closed.
        let mut choir = Choir::assemble(song, &self.catalog, &sink, output_lock, &events_tx)?;

        let mut report = PlayReport {
            song: song.name().to_string(),
            members: choir.len(),
            notes_cued: 0,
            notes_skipped: 0,
            cancelled: false,
            elapsed: Duration::ZERO,
        };

        if !song.is_empty() && !self.playback_delay.is_zero() {
            spin_sleep::sleep(self.playback_delay);
        }

        let mut deadline = Instant::now();
        for note in song.notes() {
            Conductor::check_events(&events_rx)?;
            if self.cancel_handle.is_cancelled() {
                info!(song = song.name(), "Playback cancelled.");
                report.cancelled = true;
                break;
            }

            let duration = note.length.duration(measure_length).min(measure_length);
            match choir.get(note.pitch).map(|member| member.cue(duration)) {
                Some(Ok(())) => report.notes_cued += 1,
                Some(Err(e)) => {
                    warn!(err = %e, "Skipping note.");
                    report.notes_skipped += 1;
                }
                None => {
                    warn!(pitch = %note.pitch, "No member for pitch, skipping note.");
                    report.notes_skipped += 1;
                }
            }

            // Pacing against the song's timeline keeps per-note overhead from accumulating.
            deadline += duration;
            if self.cancel_handle.wait_until(deadline) {
                info!(song = song.name(), "Playback cancelled.");
                report.cancelled = true;
                break;
            }
        }

        if !report.cancelled {
            // Members can still be writing after the last deadline, especially when they
            // queue on the output lock.
            choir.wait_idle();
            Conductor::check_events(&events_rx)?;
            sink.drain().map_err(|error| PlayError::Output { pitch: None, error })?;
        }

        choir.dismiss();
        Conductor::check_events(&events_rx)?;
        drop(choir);
        drop(sink);

        report.elapsed = start.elapsed();
        info!(
            song = report.song,
            members = report.members,
            notes = report.notes_cued,
            skipped = report.notes_skipped,
            cancelled = report.cancelled,
            "Song finished playing."
        );
        Ok(report)
    }

    /// Reports worker events. A failed write ends the play, a cancelled member only leaves a
    /// gap in the song.
    fn check_events(events_rx: &Receiver<MemberEvent>) -> Result<(), PlayError> {
        for event in events_rx.try_iter() {
            match event {
                MemberEvent::Cancelled { pitch } => {
                    warn!(pitch = %pitch, "Member was cancelled, its notes will be missing.")
                }
                MemberEvent::WriteFailed { pitch, error } => {
                    error!(pitch = %pitch, err = %error, "Member failed to write, aborting song.");
                    return Err(PlayError::Output {
                        pitch: Some(pitch),
                        error,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, sync::Arc, thread, time::Duration};

    use crate::{
        audio::mock,
        notes::{NoteCatalog, Pitch},
        songs::{BellNote, FormatReason, LoadError, NoteLength, Song},
        testutil::write_song,
    };

    use super::*;

    const SAMPLE_RATE: u32 = 1000;
    const DAMPING: usize = 5;

    fn conductor(device: &mock::Device, measure_length: Duration) -> Conductor {
        let catalog = Arc::new(NoteCatalog::new(SAMPLE_RATE, measure_length, DAMPING));
        Conductor::new(Arc::new(device.clone()), catalog)
    }

    fn writers(device: &mock::Device) -> Vec<String> {
        device
            .state()
            .writes()
            .into_iter()
            .filter(|write| !write.silent)
            .filter_map(|write| write.writer)
            .collect()
    }

    #[test]
    fn test_play_song() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_song(dir.path(), "scenario", "A4 4\nB4 4\nREST 2\n");
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(200));

        let session = conductor.load_song(&path);
        assert!(session.is_playable());

        let report = conductor.play(&session)?;
        assert_eq!("scenario", report.song);
        assert_eq!(3, report.members);
        assert_eq!(3, report.notes_cued);
        assert_eq!(0, report.notes_skipped);
        assert!(!report.cancelled);
        assert!(report.elapsed >= Duration::from_millis(200));

        let state = device.state();
        assert!(state.is_started());
        assert!(state.is_drained());
        assert!(state.is_closed());
        assert_eq!(Some(Format::new(SAMPLE_RATE)), state.format());

        // Each note is followed by its damping silence, rung by the member that owns the pitch.
        let writes = state.writes();
        let lens: Vec<usize> = writes.iter().map(|write| write.len).collect();
        assert_eq!(vec![50, DAMPING, 50, DAMPING, 100, DAMPING], lens);
        let owners: Vec<Option<&str>> = writes
            .iter()
            .map(|write| write.writer.as_deref())
            .collect();
        assert_eq!(
            vec![
                Some("member-A4"),
                Some("member-A4"),
                Some("member-B4"),
                Some("member-B4"),
                Some("member-REST"),
                Some("member-REST"),
            ],
            owners
        );
        assert!(writes[4].silent);
        Ok(())
    }

    #[test]
    fn test_one_member_per_pitch() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(200));
        let song = Song::new(
            "repeats",
            vec![
                BellNote::new(Pitch::A4, NoteLength::Quarter),
                BellNote::new(Pitch::B4, NoteLength::Quarter),
                BellNote::new(Pitch::A4, NoteLength::Quarter),
                BellNote::new(Pitch::A4, NoteLength::Quarter),
                BellNote::new(Pitch::B4, NoteLength::Quarter),
            ],
        );

        let report = conductor.play_song(&song)?;
        assert_eq!(2, report.members);
        assert_eq!(5, report.notes_cued);
        assert_eq!(
            vec!["member-A4", "member-B4", "member-A4", "member-A4", "member-B4"],
            writers(&device)
        );
        Ok(())
    }

    #[test]
    fn test_whole_notes_capped_at_measure() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(100));
        let song = Song::parse("long", "A5 1\nA5 16\n")?;

        conductor.play_song(&song)?;
        let lens: Vec<usize> = device.state().writes().iter().map(|write| write.len).collect();
        assert_eq!(vec![100, DAMPING, 6, DAMPING], lens);
        Ok(())
    }

    #[test]
    fn test_empty_song() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(200));

        let report = conductor.play_song(&Song::new("empty", Vec::new()))?;
        assert_eq!(0, report.members);
        assert_eq!(0, report.notes_cued);
        assert!(report.elapsed < Duration::from_millis(200));

        let state = device.state();
        assert!(state.is_started());
        assert!(state.is_drained());
        assert!(state.is_closed());
        assert!(state.writes().is_empty());
        Ok(())
    }

    #[test]
    fn test_unplayable_session() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_song(dir.path(), "broken", "A4 4\nB4 4\nC4 5\nD4 4\n");
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(200));

        let session = conductor.load_song(&path);
        match &session {
            Session::Unplayable {
                error: LoadError::Format(error),
                ..
            } => {
                assert_eq!(3, error.line);
                assert_eq!(FormatReason::UnknownLength("5".to_string()), error.reason);
            }
            other => panic!("expected an unplayable session, got {:?}", other),
        }

        assert!(matches!(
            conductor.play(&session),
            Err(PlayError::Unplayable { .. })
        ));
        // The device was never touched.
        assert_eq!(None, device.state().format());
        assert!(device.state().writes().is_empty());

        let session = conductor.load_song(&dir.path().join("missing.txt"));
        assert!(matches!(
            session,
            Session::Unplayable {
                error: LoadError::Io { .. },
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_device_unavailable() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        device.fail_open();
        let conductor = conductor(&device, Duration::from_millis(200));

        let result = conductor.play_song(&Song::parse("song", "A4 4\n")?);
        assert!(matches!(
            result,
            Err(PlayError::DeviceUnavailable(AudioError::DeviceUnavailable { .. }))
        ));
        assert!(device.state().writes().is_empty());
        Ok(())
    }

    #[test]
    fn test_write_failure_aborts_play() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        device.fail_writes_after(2);
        let conductor = conductor(&device, Duration::from_millis(200));

        let result = conductor.play_song(&Song::parse("song", "A4 8\nB4 8\nC4 8\nD4 8\n")?);
        assert!(matches!(
            result,
            Err(PlayError::Output {
                pitch: Some(Pitch::B4),
                error: AudioError::Write(_)
            })
        ));

        let state = device.state();
        assert!(state.is_closed());
        assert_eq!(2, state.writes().len());
        // Every member worker has exited and let go of the sink.
        assert!(state.is_released());
        Ok(())
    }

    #[test]
    fn test_cancel_play() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(500));
        let song = Song::parse("long", &"A4 1\n".repeat(10))?;

        let cancel_handle = conductor.cancel_handle();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel_handle.cancel();
        });

        let report = conductor.play_song(&song)?;
        canceller.join().expect("canceller panicked");

        assert!(report.cancelled);
        assert_eq!(1, report.notes_cued);
        assert!(report.elapsed < Duration::from_secs(2));
        assert!(device.state().is_closed());

        // The handle is reset for the next play.
        let report = conductor.play_song(&Song::parse("short", "A4 16\n")?)?;
        assert!(!report.cancelled);
        Ok(())
    }

    #[test]
    fn test_exclusive_output() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        device.set_write_latency(Duration::from_millis(20));
        let conductor = conductor(&device, Duration::from_millis(80)).with_exclusive_output(true);
        let song = Song::parse("fast", "A4 16\nB4 16\nC4 16\nD4 16\nE4 16\nF4 16\n")?;

        let report = conductor.play_song(&song)?;
        assert_eq!(6, report.notes_cued);

        let state = device.state();
        assert_eq!(1, state.max_active_writers());

        // Members queued on the lock finish ringing before the sink is drained.
        let writes = state.writes();
        assert_eq!(12, writes.len());
        let drained_at = state.drained_at().ok_or("sink was never drained")?;
        assert!(writes.iter().all(|write| write.at <= drained_at));
        assert!(state.is_released());
        Ok(())
    }

    #[test]
    fn test_cancel_before_play() -> Result<(), Box<dyn Error>> {
        let device = mock::Device::get("mock");
        let conductor = conductor(&device, Duration::from_millis(200));
        let song = Song::parse("song", "A4 4
B4 4
")?;

        conductor.cancel_handle().cancel();
        let report = conductor.play_song(&song)?;
        assert!(report.cancelled);
        assert_eq!(0, report.notes_cued);
        assert!(device.state().writes().is_empty());
        assert!(device.state().is_released());

        // The cancel only applied to the play it interrupted.
        let report = conductor.play_song(&song)?;
        assert!(!report.cancelled);
        assert_eq!(2, report.notes_cued);
        Ok(())
    }

    #[test]
    fn test_paced_output_can_overlap() -> Result<(), Box<dyn Error>> {
        // Without the lock, only the pacing keeps members apart. A sink slower than the
        // pacing lets writes overlap.
        let device = mock::Device::get("mock");
        device.set_write_latency(Duration::from_millis(50));
        let conductor = conductor(&device, Duration::from_millis(80));
        let song = Song::parse("fast", "A4 16\nB4 16\nC4 16\nD4 16\n")?;

        conductor.play_song(&song)?;
        assert!(device.state().max_active_writers() > 1);
        Ok(())
    }
}
