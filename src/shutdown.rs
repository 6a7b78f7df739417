//! Cooperative cancellation shared by every blocking wait in a run.
//!
//! The rate limiter and the retry cooldown both sleep through [`Shutdown::sleep`],
//! so triggering the token wakes them immediately instead of letting a run hang
//! in a 30 second cooldown.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct State {
    triggered: Mutex<bool>,
    wake: Condvar,
}

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    state: Arc<State>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self.state.triggered.lock();
        *triggered = true;
        self.state.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.state.triggered.lock()
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_triggered() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless the token fires first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        let mut triggered = self.state.triggered.lock();
        loop {
            if *triggered {
                return Err(Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            // Spurious wakeups loop back and re-check both conditions.
            let _ = self.state.wake.wait_until(&mut triggered, deadline);
        }
    }

    /// Triggers the token once `after` has elapsed. The watchdog exits early
    /// if something else triggers the token first.
    pub fn trigger_after(&self, after: Duration) -> JoinHandle<()> {
        let shutdown = self.clone();
        std::thread::spawn(move || {
            if shutdown.sleep(after).is_ok() {
                tracing::warn!(
                    limit_secs = after.as_secs(),
                    "run exceeded its time limit, cancelling"
                );
                shutdown.trigger();
            }
        })
    }
}
