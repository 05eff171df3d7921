//! Telemetry: stats snapshot and log tail (§4.8).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::backoff::BackoffCoordinator;
use crate::db::Database;
use crate::disk_space::disk_remaining;
use crate::queue::TaskQueue;
use crate::types::Stats;

const LOG_RING_CAPACITY: usize = 50_000;

/// Bounded ring buffer backing `Telemetry::logs` (§4.8).
///
/// Lines are addressed by a monotonically increasing index so a caller can
/// poll for "everything since my last read" even after old lines have
/// rolled off the buffer.
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
    total_emitted: AtomicU64,
}

impl LogRing {
    /// Construct an empty ring.
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)),
            total_emitted: AtomicU64::new(0),
        }
    }

    /// Append a formatted log line, evicting the oldest line once the ring
    /// is at capacity.
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == LOG_RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
        self.total_emitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Tail of the buffer starting at `from_index`, plus the new sentinel
    /// index to pass on the next call.
    pub fn tail(&self, from_index: u64) -> (Vec<String>, u64) {
        let lines = self.lines.lock().unwrap();
        let total_emitted = self.total_emitted.load(Ordering::SeqCst);
        let dropped = total_emitted.saturating_sub(lines.len() as u64);
        let start = from_index.max(dropped).saturating_sub(dropped) as usize;
        let tail = lines.iter().skip(start).cloned().collect();
        (tail, total_emitted)
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

struct SpeedWindow {
    bytes_this_second: u64,
    window_start: Instant,
    bytes_per_sec: f64,
}

/// Shared atomic counters mutated by the scanner, workers, and the scaling
/// controller (§5 "Stats: single mutex; held only for increment/read").
pub struct Counters {
    /// Item identifiers the scanner has finished fetching metadata for.
    pub scanned_ids: AtomicU64,
    /// Files successfully downloaded and verified this run.
    pub items_done: AtomicU64,
    /// Files the scanner has enqueued this run.
    pub total_files: AtomicU64,
    /// Cumulative bytes downloaded this run.
    pub total_bytes_downloaded: AtomicU64,
    /// Files that exhausted their retry budget this run.
    pub failed_files: AtomicU64,
    /// Current consecutive-success streak feeding the scaling controller.
    pub success_streak: AtomicU32,
    /// Desired worker count from the scaling controller.
    pub target_workers: AtomicUsize,
    /// Whether the scanner task is still running.
    pub scanner_active: AtomicBool,
    speed: Mutex<SpeedWindow>,
}

impl Counters {
    /// Construct counters with the scaling controller's initial target
    /// (§4.7: `max_workers` if disabled, 1 if dynamic scaling is enabled).
    pub fn new(initial_target_workers: usize) -> Self {
        Self {
            scanned_ids: AtomicU64::new(0),
            items_done: AtomicU64::new(0),
            total_files: AtomicU64::new(0),
            total_bytes_downloaded: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            success_streak: AtomicU32::new(0),
            target_workers: AtomicUsize::new(initial_target_workers),
            scanner_active: AtomicBool::new(true),
            speed: Mutex::new(SpeedWindow {
                bytes_this_second: 0,
                window_start: Instant::now(),
                bytes_per_sec: 0.0,
            }),
        }
    }

    /// Record bytes received for one streamed chunk (§4.8 speed window).
    pub fn record_bytes(&self, n: u64) {
        self.total_bytes_downloaded.fetch_add(n, Ordering::SeqCst);
        let mut window = self.speed.lock().unwrap();
        window.bytes_this_second += n;
        let elapsed = window.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            window.bytes_per_sec = window.bytes_this_second as f64 / elapsed.as_secs_f64();
            window.bytes_this_second = 0;
            window.window_start = Instant::now();
        }
    }

    fn bytes_per_sec(&self) -> f64 {
        self.speed.lock().unwrap().bytes_per_sec
    }
}

/// Assembles [`Stats`] snapshots and serves the log tail (§4.8).
pub struct Telemetry {
    counters: std::sync::Arc<Counters>,
    db: Database,
    queue: std::sync::Arc<TaskQueue>,
    backoff: std::sync::Arc<BackoffCoordinator>,
    log_ring: std::sync::Arc<LogRing>,
    output_dir: PathBuf,
}

impl Telemetry {
    /// Construct a telemetry facade over the engine's shared components.
    pub fn new(
        counters: std::sync::Arc<Counters>,
        db: Database,
        queue: std::sync::Arc<TaskQueue>,
        backoff: std::sync::Arc<BackoffCoordinator>,
        log_ring: std::sync::Arc<LogRing>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            counters,
            db,
            queue,
            backoff,
            log_ring,
            output_dir,
        }
    }

    /// Produce a stats snapshot (§4.8's stable key contract).
    pub async fn stats(&self) -> Stats {
        let counts = self.db.counts().await.unwrap_or_default();
        let bytes_per_sec = self.counters.bytes_per_sec();
        let total_files = self.counters.total_files.load(Ordering::SeqCst);
        let items_done = self.counters.items_done.load(Ordering::SeqCst);
        let total_bytes_downloaded = self.counters.total_bytes_downloaded.load(Ordering::SeqCst);
        let target_workers = self.counters.target_workers.load(Ordering::SeqCst);

        let percent_complete = if total_files == 0 {
            0.0
        } else {
            items_done as f64 / total_files as f64 * 100.0
        };

        let remaining_files = total_files.saturating_sub(items_done);
        let eta_seconds = if bytes_per_sec > 0.0 && items_done > 0 && remaining_files > 0 {
            let avg_bytes_per_file = total_bytes_downloaded as f64 / items_done as f64;
            let remaining_bytes = avg_bytes_per_file * remaining_files as f64;
            Some((remaining_bytes / bytes_per_sec).round() as u64)
        } else {
            None
        };

        let global_backoff_until = self.backoff.remaining().map(|remaining| {
            Utc::now().timestamp() + remaining.as_secs() as i64
        });

        Stats {
            scanned_ids: self.counters.scanned_ids.load(Ordering::SeqCst),
            items_done,
            total_files,
            active_threads: target_workers,
            bytes_per_sec,
            backoff_active: self.backoff.active(),
            disk_remaining: disk_remaining(&self.output_dir),
            last_log_index: self.log_ring.tail(u64::MAX).1,
            vault_status: "healthy",
            eta_seconds,
            percent_complete,
            current_speed_mbps: bytes_per_sec * 8.0 / 1e6,
            total_bytes_downloaded,
            failed_files: self.counters.failed_files.load(Ordering::SeqCst),
            target_workers,
            success_streak: self.counters.success_streak.load(Ordering::SeqCst),
            global_backoff_until,
            scanner_active: self.counters.scanner_active.load(Ordering::SeqCst),
            queue_depth: self.queue.depth(),
            heartbeat: Utc::now().timestamp(),
            job_total_files: counts.total,
            job_files_done: counts.done,
            job_percent_complete: if counts.total == 0 {
                0.0
            } else {
                counts.done as f64 / counts.total as f64 * 100.0
            },
        }
    }

    /// Tail of the log ring starting at `from_index` (§4.8 `logs()`).
    pub fn logs(&self, from_index: u64) -> (Vec<String>, u64) {
        self.log_ring.tail(from_index)
    }
}
