//! Adaptive worker-scaling controller (§4.7).
//!
//! The pool itself is fixed at `max_workers` spawned worker tasks; what
//! actually varies is a semaphore's permit count, gating how many of
//! them may be downloading at once. `target_workers` is therefore
//! advisory telemetry as well as the semaphore's live permit count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::telemetry::Counters;

const STREAK_THRESHOLD: u32 = 5;

/// Adjusts the number of in-flight download permits from recent outcomes.
///
/// The worker pool itself is a fixed number of tasks, spawned once at
/// engine startup equal to the original `max_workers`; that ceiling is
/// `spawned_workers` below. A runtime `set_max_workers` call can only
/// raise or lower the *cap* within that ceiling, since there is no
/// mechanism to spawn additional worker tasks later (§9's "fixed pool
/// gated by a semaphore" option).
pub struct ScalingController {
    spawned_workers: usize,
    max_workers: AtomicUsize,
    dynamic: bool,
    counters: Arc<Counters>,
    semaphore: Arc<Semaphore>,
}

impl ScalingController {
    /// Construct a controller. If `dynamic_scaling` is off, the semaphore
    /// starts (and stays) at `max_workers` permits; otherwise it starts at 1.
    pub fn new(max_workers: usize, dynamic_scaling: bool, counters: Arc<Counters>) -> Self {
        let initial = if dynamic_scaling { 1 } else { max_workers };
        counters.target_workers.store(initial, Ordering::SeqCst);
        Self {
            spawned_workers: max_workers,
            max_workers: AtomicUsize::new(max_workers),
            dynamic: dynamic_scaling,
            counters,
            semaphore: Arc::new(Semaphore::new(initial)),
        }
    }

    /// Clone of the shared semaphore; a worker holds one permit for the
    /// duration of one task's download.
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    /// Number of worker tasks the engine should actually spawn.
    pub fn spawned_workers(&self) -> usize {
        self.spawned_workers
    }

    fn add_permits_to(&self, new_target: usize) {
        let current = self.counters.target_workers.swap(new_target, Ordering::SeqCst);
        if new_target > current {
            self.semaphore.add_permits(new_target - current);
        } else {
            for _ in 0..(current - new_target) {
                if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                    permit.forget();
                }
            }
        }
    }

    /// Runtime update of the worker-count ceiling (§6 `max_workers` is
    /// runtime-updatable), clamped to the number of tasks actually spawned.
    pub fn set_max_workers(&self, new_max: usize) {
        let clamped = new_max.clamp(1, self.spawned_workers);
        self.max_workers.store(clamped, Ordering::SeqCst);
        if !self.dynamic {
            self.add_permits_to(clamped);
        }
    }

    /// Record a successful download outcome.
    pub fn record_success(&self) {
        if !self.dynamic {
            return;
        }
        let streak = self.counters.success_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= STREAK_THRESHOLD {
            let target = self.counters.target_workers.load(Ordering::SeqCst);
            let max = self.max_workers.load(Ordering::SeqCst);
            if target < max {
                self.counters.target_workers.store(target + 1, Ordering::SeqCst);
                self.semaphore.add_permits(1);
            }
            self.counters.success_streak.store(0, Ordering::SeqCst);
        }
    }

    /// Record a failed download outcome.
    pub fn record_failure(&self) {
        if !self.dynamic {
            return;
        }
        self.counters.success_streak.store(0, Ordering::SeqCst);
        let target = self.counters.target_workers.load(Ordering::SeqCst);
        if target > 1 {
            self.counters.target_workers.store(target - 1, Ordering::SeqCst);
            if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                permit.forget();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> Arc<Counters> {
        Arc::new(Counters::new(1))
    }

    #[test]
    fn disabled_scaling_targets_max_workers_and_never_changes() {
        let counters = counters();
        let scaling = ScalingController::new(4, false, counters.clone());
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 4);
        scaling.record_failure();
        scaling.record_success();
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn enabled_scaling_starts_at_one() {
        let counters = counters();
        let _scaling = ScalingController::new(4, true, counters.clone());
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn five_successes_bump_target_and_reset_streak() {
        let counters = counters();
        let scaling = ScalingController::new(4, true, counters.clone());
        for _ in 0..5 {
            scaling.record_success();
        }
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 2);
        assert_eq!(counters.success_streak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn target_never_exceeds_max_workers() {
        let counters = counters();
        let scaling = ScalingController::new(2, true, counters.clone());
        for _ in 0..50 {
            scaling.record_success();
        }
        assert!(counters.target_workers.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn failure_resets_streak_and_decrements_target_above_one() {
        let counters = counters();
        let scaling = ScalingController::new(4, true, counters.clone());
        for _ in 0..5 {
            scaling.record_success();
        }
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 2);
        scaling.record_failure();
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 1);
        assert_eq!(counters.success_streak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_never_drops_target_below_one() {
        let counters = counters();
        let scaling = ScalingController::new(4, true, counters.clone());
        scaling.record_failure();
        scaling.record_failure();
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_max_workers_is_clamped_to_spawned_count_in_disabled_mode() {
        let counters = counters();
        let scaling = ScalingController::new(4, false, counters.clone());
        scaling.set_max_workers(100);
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 4);

        scaling.set_max_workers(2);
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn set_max_workers_raises_the_ceiling_in_dynamic_mode_without_forcing_target() {
        let counters = counters();
        let scaling = ScalingController::new(4, true, counters.clone());
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 1);
        scaling.set_max_workers(2);
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 1);
        for _ in 0..5 {
            scaling.record_success();
        }
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 2);
        for _ in 0..5 {
            scaling.record_success();
        }
        assert_eq!(counters.target_workers.load(Ordering::SeqCst), 2);
    }
}
