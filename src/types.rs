//! Core data types for grab-ia.

use serde::{Deserialize, Serialize};

/// Opaque identifier naming an Internet Archive item (e.g. `"nasa-images"`).
pub type Identifier = String;

/// Status of a [`FileRecord`] (§3 of the spec).
///
/// Transitions only along: `Pending -> Retrying -> {Pending|Failed|Done}`,
/// `Pending -> Done`, `Pending -> Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Discovered by the scanner, not yet attempted (or requeued after a transient failure).
    Pending,
    /// A previous attempt failed and this file is queued for another try.
    Retrying,
    /// Downloaded, verified, and published to its final path.
    Done,
    /// Exhausted its retry budget (§7 "Exhausted").
    Failed,
}

impl Status {
    /// Convert the integer status code stored in the state store to a `Status`.
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Pending,
            1 => Status::Retrying,
            2 => Status::Done,
            3 => Status::Failed,
            _ => Status::Failed,
        }
    }

    /// Convert a `Status` to the integer code stored in the state store.
    pub fn to_i32(self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Retrying => 1,
            Status::Done => 2,
            Status::Failed => 3,
        }
    }
}

/// Persistent record of one (item, file) pair (§3).
///
/// Primary key is `(item_id, file_name)`. Inserted by the Scanner
/// (upsert, resets status to pending), mutated only by Workers.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    /// Identifier of the owning item.
    pub item_id: Identifier,
    /// Sanitized file name (§4.5 step 9); used both as the on-disk name and as
    /// half of the primary key.
    pub file_name: String,
    /// Current lifecycle status.
    pub status: Status,
    /// Declared size in bytes, 0 if unknown. A file with size 0 is never
    /// enqueued (§4.5 step 4), so a stored record always has size > 0
    /// unless it predates a run that changed the filter configuration.
    pub size: u64,
    /// Expected MD5 hex digest, if the metadata document provided one.
    pub expected_md5: Option<String>,
    /// Number of attempts made so far. Monotonically non-decreasing for a
    /// given key; a record only reaches `Failed` once this is 3.
    pub attempt_count: u32,
}

/// In-memory unit of work pushed onto the [`crate::queue::TaskQueue`] (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    /// Identifier of the owning item.
    pub item_id: Identifier,
    /// Sanitized local file name (matches the [`FileRecord`] key).
    pub file_name: String,
    /// Unsanitized download URL, built from the name the server reported.
    pub file_url: String,
    /// Declared size in bytes (0 if unknown).
    pub size: u64,
    /// Expected MD5 hex digest, if known.
    pub expected_md5: Option<String>,
    /// Number of prior attempts; drives the worker's jittered retry sleep.
    pub attempt_count: u32,
    /// Queue priority tier — lower values are dequeued first (§3).
    pub priority: u8,
}

impl DownloadTask {
    /// Priority tiers from §3: metadata-like files first, then normal
    /// files, then anything larger than 100 MiB last.
    pub const PRIORITY_METADATA: u8 = 10;
    pub const PRIORITY_NORMAL: u8 = 50;
    pub const PRIORITY_LARGE: u8 = 80;

    const LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

    /// Derive a task's priority tier from its (sanitized) filename and size,
    /// per §3's rule: metadata-ish names win regardless of size.
    pub fn derive_priority(file_name: &str, size: u64) -> u8 {
        let lower = file_name.to_lowercase();
        if lower.ends_with(".xml")
            || lower.ends_with(".json")
            || lower.ends_with(".txt")
            || lower.contains("readme")
        {
            Self::PRIORITY_METADATA
        } else if size > Self::LARGE_FILE_THRESHOLD {
            Self::PRIORITY_LARGE
        } else {
            Self::PRIORITY_NORMAL
        }
    }
}

/// Ordering for the task queue's min-heap: lower `priority` dequeues first.
/// Ties are broken arbitrarily (§9 "Priority ties are unspecified").
impl Ord for DownloadTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.priority.cmp(&self.priority)
    }
}

impl PartialOrd for DownloadTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Aggregate counts from the state store (§4.1 `counts()`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Total rows.
    pub total: u64,
    /// Rows with status `done`.
    pub done: u64,
    /// Rows with status `failed`.
    pub failed: u64,
    /// Rows with status `pending`.
    pub pending: u64,
    /// Rows with status `retrying`.
    pub retrying: u64,
}

/// Snapshot returned by [`crate::telemetry::Telemetry::stats`] (§4.8).
///
/// Field names match the spec's stable contract exactly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stats {
    /// Number of item identifiers the scanner has finished fetching metadata for.
    pub scanned_ids: u64,
    /// Number of files successfully downloaded and verified this run.
    pub items_done: u64,
    /// Total number of files the scanner has enqueued this run.
    pub total_files: u64,
    /// Reports `target_workers`, not the instantaneous in-flight count (§9).
    pub active_threads: usize,
    /// Most recent one-second bandwidth sample, in bytes/sec.
    pub bytes_per_sec: f64,
    /// Whether the global backoff coordinator is currently active.
    pub backoff_active: bool,
    /// Free bytes on the output volume; informational only (§9).
    pub disk_remaining: Option<u64>,
    /// Sentinel index to pass back into `logs()` for the next tail read.
    pub last_log_index: u64,
    /// Always `"healthy"` while the engine is running.
    pub vault_status: &'static str,
    /// Rough estimate of remaining seconds at the current speed.
    pub eta_seconds: Option<u64>,
    /// Completion percentage from in-memory counters (not the resume-safe one).
    pub percent_complete: f64,
    /// `bytes_per_sec * 8 / 1e6`.
    pub current_speed_mbps: f64,
    /// Cumulative bytes downloaded this run.
    pub total_bytes_downloaded: u64,
    /// Number of files that exhausted their retry budget this run.
    pub failed_files: u64,
    /// Desired worker count from the scaling controller.
    pub target_workers: usize,
    /// Current consecutive-success streak feeding the scaling controller.
    pub success_streak: u32,
    /// Unix timestamp (seconds) until which the global backoff is active, if any.
    pub global_backoff_until: Option<i64>,
    /// Whether the scanner task is still running.
    pub scanner_active: bool,
    /// Current depth of the task queue.
    pub queue_depth: usize,
    /// Current time, as a heartbeat for liveness polling.
    pub heartbeat: i64,
    /// Total files recorded in the state store (resume-safe).
    pub job_total_files: u64,
    /// Files marked done in the state store (resume-safe).
    pub job_files_done: u64,
    /// `job_files_done / job_total_files`, resume-safe.
    pub job_percent_complete: f64,
}
