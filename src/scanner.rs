//! Metadata scanner (§4.5).
//!
//! Walks a list of item identifiers, fetches each item's metadata
//! document, filters and sanitizes its file listing, and feeds the
//! survivors into the state store and the task queue. Runs as its own
//! task alongside the worker pool; a non-200 metadata fetch for one
//! identifier is logged and skipped rather than aborting the scan.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::http::with_basic_auth;
use crate::queue::TaskQueue;
use crate::readme::ReadmeEmitter;
use crate::telemetry::Counters;
use crate::types::{DownloadTask, FileRecord, Identifier, Status};

/// Filenames matching any of these (case-insensitive) are archive.org's own
/// derivative bookkeeping, never user content (§4.5 step 6).
const SYSTEM_PATTERNS: &[&str] = &[
    "_meta.xml",
    "_meta.sqlite",
    "_files.xml",
    "_thumb.jpg",
    "_itemimage.jpg",
];

/// Characters illegal (or awkward) in a filename on at least one major
/// filesystem; replaced with `_` during sanitization (§4.5 step 9).
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const METADATA_SUBSTRINGS: &[&str] = &[".xml", ".json", ".txt", "readme"];

#[derive(Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    files: Vec<MetadataFile>,
}

#[derive(Deserialize)]
struct MetadataFile {
    name: String,
    #[serde(default, deserialize_with = "deserialize_size")]
    size: u64,
    #[serde(default)]
    md5: Option<String>,
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(u64),
    }

    match Option::<StringOrInt>::deserialize(deserializer)? {
        Some(StringOrInt::Int(n)) => Ok(n),
        Some(StringOrInt::String(s)) => Ok(s.parse().unwrap_or(0)),
        None => Ok(0),
    }
}

/// Replace every character in [`UNSAFE_CHARS`] with `_`.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

fn is_system_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    SYSTEM_PATTERNS.iter().any(|p| lower.ends_with(p))
}

fn has_metadata_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    METADATA_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

fn matches_extension_whitelist(name: &str, whitelist: &[String]) -> bool {
    let lower = name.to_lowercase();
    whitelist
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext.to_lowercase())))
}

/// Scans identifiers, enqueueing discovered files for download.
pub struct Scanner {
    client: Client,
    config: Arc<Config>,
    db: Database,
    queue: Arc<TaskQueue>,
    readme: Arc<dyn ReadmeEmitter>,
    counters: Arc<Counters>,
    filter: Option<regex::Regex>,
}

impl Scanner {
    /// Construct a scanner. Fails only if `config.filter_regex` does not compile.
    pub fn new(
        client: Client,
        config: Arc<Config>,
        db: Database,
        queue: Arc<TaskQueue>,
        readme: Arc<dyn ReadmeEmitter>,
        counters: Arc<Counters>,
    ) -> Result<Self> {
        let filter = config.compiled_filter()?;
        Ok(Self {
            client,
            config,
            db,
            queue,
            readme,
            counters,
            filter,
        })
    }

    /// Scan every identifier in `identifiers`, in order, until the list is
    /// exhausted or `cancel` fires. A cancellation is only observed between
    /// identifiers, never mid-fetch (§4.5 "aborts mid-identifier" refers to
    /// the scan as a whole, not a partial file listing).
    pub async fn run(&self, identifiers: &[Identifier], cancel: &CancellationToken) {
        self.counters.scanner_active.store(true, Ordering::SeqCst);
        for item_id in identifiers {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self.scan_item(item_id).await {
                warn!(item_id = %item_id, error = %err, "metadata fetch failed, skipping item");
            }
        }
        self.counters.scanner_active.store(false, Ordering::SeqCst);
    }

    async fn scan_item(&self, item_id: &str) -> Result<()> {
        let url = format!("{}/metadata/{item_id}", self.config.api_base_url());
        let request = with_basic_auth(self.client.get(&url), &self.config);
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(Error::BadStatus(response.status()));
        }

        let metadata: serde_json::Value = response.json().await?;
        let parsed: MetadataResponse = serde_json::from_value(metadata.clone())?;

        if let Err(err) = self.readme.emit(item_id, &metadata) {
            warn!(item_id = %item_id, error = %err, "README emitter failed, continuing scan");
        }

        let mut enqueued = 0u64;
        for file in parsed.files {
            if self.accept(&file) {
                self.enqueue(item_id, &file).await?;
                enqueued += 1;
            }
        }

        info!(item_id = %item_id, files = enqueued, "scanned item");
        self.counters.total_files.fetch_add(enqueued, Ordering::SeqCst);
        self.counters.scanned_ids.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self, file: &MetadataFile) -> bool {
        if file.name.is_empty() || file.size == 0 {
            return false;
        }
        if is_system_file(&file.name) {
            return false;
        }
        if self.config.metadata_only && !has_metadata_extension(&file.name) {
            return false;
        }
        if let Some(whitelist) = &self.config.extension_whitelist {
            if !matches_extension_whitelist(&file.name, whitelist) {
                return false;
            }
        }
        if let Some(filter) = &self.filter {
            if !filter.is_match(&file.name) {
                return false;
            }
        }
        true
    }

    async fn enqueue(&self, item_id: &str, file: &MetadataFile) -> Result<()> {
        let safe_name = sanitize_file_name(&file.name);

        let record = FileRecord {
            item_id: item_id.to_string(),
            file_name: safe_name.clone(),
            status: Status::Pending,
            size: file.size,
            expected_md5: file.md5.clone(),
            attempt_count: 0,
        };
        self.db.upsert(&record).await?;

        // `upsert` leaves an already-`done` row untouched; skip re-enqueuing
        // it so a rescan of a completed item does no redundant HTTP GET
        // (§8 resume-idempotence law).
        let stored = self.db.get(item_id, &safe_name).await?;
        if matches!(stored, Some(r) if r.status == Status::Done) {
            return Ok(());
        }

        let priority = DownloadTask::derive_priority(&safe_name, file.size);
        let task = DownloadTask {
            item_id: item_id.to_string(),
            file_name: safe_name,
            file_url: format!("{}/download/{item_id}/{}", self.config.api_base_url(), file.name),
            size: file.size,
            expected_md5: file.md5.clone(),
            attempt_count: 0,
            priority,
        };
        self.queue.push(task);

        Ok(())
    }
}
