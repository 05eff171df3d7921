//! Process-wide backoff coordinator (§4.3).
//!
//! A single "pause until T" barrier honored by all workers, triggered by
//! server pressure (HTTP 429/503) rather than per-worker retry delays.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

const WAIT_STEP: Duration = Duration::from_millis(500);

/// Global backoff barrier shared by the scanner and every worker.
pub struct BackoffCoordinator {
    not_before: Mutex<Instant>,
}

impl BackoffCoordinator {
    /// Construct a coordinator that starts inactive.
    pub fn new() -> Self {
        Self {
            not_before: Mutex::new(Instant::now()),
        }
    }

    /// Push `not_before` out by at least `duration` from now. Never pulls
    /// the deadline in — concurrent 429s only ever extend the pause.
    pub fn trigger(&self, duration: Duration) {
        let target = Instant::now() + duration;
        let mut guard = self.not_before.lock().unwrap();
        if target > *guard {
            *guard = target;
        }
    }

    /// Whether the barrier is currently active.
    pub fn active(&self) -> bool {
        Instant::now() < *self.not_before.lock().unwrap()
    }

    /// Remaining duration until the barrier clears, `None` if inactive.
    pub fn remaining(&self) -> Option<Duration> {
        let not_before = *self.not_before.lock().unwrap();
        not_before.checked_duration_since(Instant::now())
    }

    /// Sleep in 500 ms steps until the barrier clears or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) {
        while self.active() {
            tokio::select! {
                _ = tokio::time::sleep(WAIT_STEP) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }
}

impl Default for BackoffCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
