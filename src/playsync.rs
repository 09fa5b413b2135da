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
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc, Condvar, Mutex};
use std::time::Duration;

/// Represents the current stop state.
#[derive(PartialEq)]
enum StopState {
    Running,
    Stopped,
}

/// A stop handle is shared between a pipeline's pump, its device callbacks,
/// and the thread waiting for the operation to end. It's the pipeline's
/// responsibility to respect a stop request.
#[derive(Clone)]
pub struct StopHandle {
    /// Set to Stopped when the underlying operation should wind down.
    state: Arc<Mutex<StopState>>,
    /// The condvar handles notification of stopping or finishing.
    condvar: Arc<Condvar>,
}

impl StopHandle {
    pub fn new() -> StopHandle {
        StopHandle {
            state: Arc::new(Mutex::new(StopState::Running)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the operation has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        *self.state.lock().expect("Error getting lock") == StopState::Stopped
    }

    /// Waits for a stop request or for finished to be set to true.
    pub fn wait(&self, finished: Arc<AtomicBool>) {
        let _unused = self
            .condvar
            .wait_while(self.state.lock().expect("Error getting lock"), |state| {
                *state == StopState::Running && !finished.load(Ordering::Relaxed)
            })
            .expect("Error getting lock");
    }

    /// Waits for a stop request or for finished to be set to true, for at
    /// most `timeout`. Returns true if the wait ended before the timeout.
    pub fn wait_timeout(&self, finished: Arc<AtomicBool>, timeout: Duration) -> bool {
        let (_guard, result) = self
            .condvar
            .wait_timeout_while(
                self.state.lock().expect("Error getting lock"),
                timeout,
                |state| *state == StopState::Running && !finished.load(Ordering::Relaxed),
            )
            .expect("Error getting lock");
        !result.timed_out()
    }

    /// Wakes up waiters so they can re-check whether their operation has
    /// stopped or finished. Holding the state lock orders the wake against a
    /// waiter's predicate check, so the notification can't be missed.
    pub fn notify(&self) {
        let _state = self.state.lock().expect("Error getting lock");
        self.condvar.notify_all();
    }

    /// Requests that the operation stop.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("Error getting lock");
        if *state == StopState::Running {
            *state = StopState::Stopped;
            self.condvar.notify_all();
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_stop_handle_stopped() {
        let stop_handle = StopHandle::new();
        assert!(!stop_handle.is_stopped());

        let join = {
            let stop_handle = stop_handle.clone();
            thread::spawn(move || stop_handle.wait(Arc::new(AtomicBool::new(false))))
        };

        stop_handle.stop();
        assert!(join.join().is_ok());
        assert!(stop_handle.is_stopped());
    }

    #[test]
    fn test_stop_handle_finished() {
        let stop_handle = StopHandle::new();
        assert!(!stop_handle.is_stopped());

        let join = {
            let stop_handle = stop_handle.clone();
            thread::spawn(move || stop_handle.wait(Arc::new(AtomicBool::new(true))))
        };

        assert!(join.join().is_ok());
        assert!(!stop_handle.is_stopped());
    }

    #[test]
    fn test_stop_handle_notify_wakes_finished_waiter() {
        let stop_handle = StopHandle::new();
        let finished = Arc::new(AtomicBool::new(false));

        let join = {
            let stop_handle = stop_handle.clone();
            let finished = finished.clone();
            thread::spawn(move || stop_handle.wait(finished))
        };

        // Give the waiter time to block, then finish and wake it.
        thread::sleep(Duration::from_millis(20));
        finished.store(true, Ordering::Relaxed);
        stop_handle.notify();
        assert!(join.join().is_ok());
        assert!(!stop_handle.is_stopped());
    }

    #[test]
    fn test_stop_handle_wait_timeout() {
        let stop_handle = StopHandle::new();

        // Nothing stops or finishes, so the wait times out.
        assert!(!stop_handle.wait_timeout(
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(20)
        ));

        // Already finished, so the wait returns immediately.
        assert!(stop_handle.wait_timeout(Arc::new(AtomicBool::new(true)), Duration::from_secs(5)));

        // Stopped from another thread.
        let join = {
            let stop_handle = stop_handle.clone();
            thread::spawn(move || {
                stop_handle
                    .wait_timeout(Arc::new(AtomicBool::new(false)), Duration::from_secs(5))
            })
        };
        stop_handle.stop();
        assert!(join.join().expect("join"));
    }
}
