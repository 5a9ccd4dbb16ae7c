#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::types::{CacheError, Result};

/// Acquires `mutex`, giving up after `timeout`.
///
/// `None` waits without bound and is reserved for shutdown paths.
pub fn lock_for<'a, T>(
    mutex: &'a Mutex<T>,
    timeout: Option<Duration>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>> {
    match timeout {
        None => Ok(mutex.lock()),
        Some(timeout) => mutex
            .try_lock_for(timeout)
            .ok_or(CacheError::Unavailable(what)),
    }
}

/// Reason a [`Signal::wait`] returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wake {
    /// [`Signal::notify`] was called since the last wait.
    Triggered,
    /// The wait interval elapsed without a notification.
    TimedOut,
    /// [`Signal::stop`] was called; the worker should exit.
    Stopped,
}

#[derive(Default)]
struct SignalState {
    pending: bool,
    stopped: bool,
}

/// Wake-up and stop flag shared between a background worker and its owner.
#[derive(Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    cv: Condvar,
}

impl Signal {
    /// Creates a signal with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests one more pass from the worker. Notifications coalesce.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.pending = true;
        self.cv.notify_one();
    }

    /// Asks the worker to exit at its next wake-up.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cv.notify_all();
    }

    /// Returns true once [`Signal::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Blocks until notified, stopped, or `interval` elapses (`None` waits indefinitely).
    pub fn wait(&self, interval: Option<Duration>) -> Wake {
        let deadline = interval.and_then(|dur| Instant::now().checked_add(dur));
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Wake::Stopped;
            }
            if state.pending {
                state.pending = false;
                return Wake::Triggered;
            }
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut state, deadline).timed_out() {
                        if state.stopped {
                            return Wake::Stopped;
                        }
                        if state.pending {
                            state.pending = false;
                            return Wake::Triggered;
                        }
                        return Wake::TimedOut;
                    }
                }
                None => self.cv.wait(&mut state),
            }
        }
    }
}

/// One-shot barrier a spawned worker opens once it has started.
pub struct StartGate<T> {
    state: Mutex<GateState<T>>,
    cv: Condvar,
}

struct GateState<T> {
    outcome: Option<T>,
    opened: bool,
}

impl<T> Default for StartGate<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(GateState {
                outcome: None,
                opened: false,
            }),
            cv: Condvar::new(),
        }
    }
}

impl<T> StartGate<T> {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the start outcome. Later calls are ignored.
    pub fn open(&self, outcome: T) {
        let mut state = self.state.lock();
        if !state.opened {
            state.opened = true;
            state.outcome = Some(outcome);
            self.cv.notify_all();
        }
    }

    /// Waits up to `timeout` for the outcome; `None` if the worker never reported.
    pub fn wait(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !state.opened {
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cv.wait(&mut state),
            }
        }
        state.outcome.take()
    }
}
