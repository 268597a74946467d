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
use std::{sync::Arc, time::Instant};

use parking_lot::{Condvar, Mutex};

/// Represents the current cancel state.
#[derive(PartialEq)]
enum CancelState {
    Untouched,
    Cancelled,
}

/// A cancel handle is shared with the conductor during a play operation. It's the conductor's
/// responsibility to respect a cancel request at each of its suspension points.
#[derive(Clone)]
pub struct CancelHandle {
    /// Set to cancelled if the underlying operation should be cancelled.
    cancelled: Arc<Mutex<CancelState>>,
    /// The condvar will handle notification of cancelling.
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(CancelState::Untouched)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the play operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock() == CancelState::Cancelled
    }

    /// Waits until the deadline passes or the handle is cancelled. Returns true if cancelled.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.cancelled.lock();
        while *cancelled == CancelState::Untouched {
            if self.condvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled == CancelState::Cancelled
    }

    /// Cancel the play operation.
    pub fn cancel(&self) {
        let mut cancel_state = self.cancelled.lock();
        if *cancel_state == CancelState::Untouched {
            *cancel_state = CancelState::Cancelled;
            self.condvar.notify_all();
        }
    }

    /// Resets the handle so it can be used for another play operation.
    pub fn reset(&self) {
        *self.cancelled.lock() = CancelState::Untouched;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        CancelHandle::new()
    }
}

#[cfg(test)]
mod test {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn test_cancel_handle_cancelled() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let join = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || {
                cancel_handle.wait_until(Instant::now() + Duration::from_secs(30))
            })
        };

        cancel_handle.cancel();
        assert!(join.join().expect("wait thread panicked"));
        assert!(cancel_handle.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_deadline() {
        let cancel_handle = CancelHandle::new();
        let start = Instant::now();

        assert!(!cancel_handle.wait_until(start + Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!cancel_handle.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_reset() {
        let cancel_handle = CancelHandle::new();
        cancel_handle.cancel();
        assert!(cancel_handle.wait_until(Instant::now()));

        cancel_handle.reset();
        assert!(!cancel_handle.is_cancelled());
    }
}
