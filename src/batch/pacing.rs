//! Cooperative pacing for batch model calls.
//!
//! Batch jobs hammer the same model endpoint the interactive pipeline uses,
//! so they insert a fixed delay between calls. The interval lives in an
//! explicit component owned by the job that runs the batch — not in shared
//! module state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Enforces a minimum interval between consecutive calls.
pub struct Pacer {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until at least `interval` has passed since the previous call.
    /// The first call never waits.
    pub fn pause(&self) {
        let previous = self.last_call.lock().ok().and_then(|guard| *guard);
        if let Some(previous) = previous {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        if let Ok(mut guard) = self.last_call.lock() {
            *guard = Some(Instant::now());
        }
    }
}
