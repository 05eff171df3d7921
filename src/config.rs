//! Configuration types for grab-ia.
//!
//! Unlike a file-backed config, this arrives already-parsed from an
//! external collaborator (CLI/UI, out of scope here), so it carries no
//! `serde` derive — just plain, validated Rust values built through
//! [`Config::builder`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// HTTP Basic credentials for archive.org requests (§6 `s3_credentials`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Access key.
    pub access: String,
    /// Secret key.
    pub secret: String,
}

/// Engine configuration (§6's table). Immutable after construction except
/// for `max_workers` and `speed_limit_bps`, which the engine exposes
/// runtime setters for (§1 Non-goals) — those live values are owned by the
/// worker pool's semaphore and the rate limiter, not by this struct.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the output tree and of the state store file.
    pub output_dir: PathBuf,
    /// Initial cap on concurrent downloads.
    pub max_workers: usize,
    /// Initial bandwidth cap in bytes/sec; 0 disables.
    pub speed_limit_bps: u64,
    /// Enables the sync-mode fast path (§4.6).
    pub sync_mode: bool,
    /// Only filenames matching this pattern are kept, if set.
    pub filter_regex: Option<String>,
    /// Only filenames with one of these suffixes (case-insensitive) are kept, if set.
    pub extension_whitelist: Option<Vec<String>>,
    /// Activates the adaptive scaling controller (§4.7).
    pub dynamic_scaling: bool,
    /// Restricts the scan to metadata-like extensions (§4.5 step 8).
    pub metadata_only: bool,
    /// Optional HTTP Basic credentials.
    pub s3_credentials: Option<Credentials>,
    /// Override for the archive.org API origin, for pointing the scanner
    /// and workers at a test double. Defaults to `https://archive.org`.
    pub api_base_url: Option<String>,
}

impl Config {
    /// Start building a `Config` rooted at `output_dir`.
    pub fn builder(output_dir: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(output_dir.into())
    }

    /// Path to the crash-safe state store (§6).
    pub fn state_db_path(&self) -> PathBuf {
        self.output_dir.join("grabia_state.db")
    }

    /// Root directory for one item's downloaded files (§3).
    pub fn item_dir(&self, item_id: &str) -> PathBuf {
        self.output_dir.join(item_id)
    }

    /// Compiled filename filter, if `filter_regex` was set.
    ///
    /// The archive.org API origin to use, honoring [`Config::api_base_url`].
    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or("https://archive.org")
    }

    /// Re-compiles on every call; the scanner compiles this once at
    /// startup and holds onto it rather than calling this per file.
    pub fn compiled_filter(&self) -> Result<Option<regex::Regex>> {
        match &self.filter_regex {
            Some(pattern) => Ok(Some(regex::Regex::new(pattern).map_err(|e| {
                Error::Config {
                    message: format!("invalid filter_regex: {e}"),
                }
            })?)),
            None => Ok(None),
        }
    }
}

/// Builder for [`Config`], validating on [`ConfigBuilder::build`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    output_dir: PathBuf,
    max_workers: usize,
    speed_limit_bps: u64,
    sync_mode: bool,
    filter_regex: Option<String>,
    extension_whitelist: Option<Vec<String>>,
    dynamic_scaling: bool,
    metadata_only: bool,
    s3_credentials: Option<Credentials>,
    api_base_url: Option<String>,
}

fn default_max_workers() -> usize {
    8
}

impl ConfigBuilder {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            max_workers: default_max_workers(),
            speed_limit_bps: 0,
            sync_mode: false,
            filter_regex: None,
            extension_whitelist: None,
            dynamic_scaling: false,
            metadata_only: false,
            s3_credentials: None,
            api_base_url: None,
        }
    }

    /// Set the initial cap on concurrent downloads.
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the initial bandwidth cap in bytes/sec (0 disables).
    pub fn speed_limit_bps(mut self, speed_limit_bps: u64) -> Self {
        self.speed_limit_bps = speed_limit_bps;
        self
    }

    /// Enable the sync-mode fast path.
    pub fn sync_mode(mut self, sync_mode: bool) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Set the filename include-regex filter.
    pub fn filter_regex(mut self, pattern: impl Into<String>) -> Self {
        self.filter_regex = Some(pattern.into());
        self
    }

    /// Set the extension whitelist (case-insensitive suffix match).
    pub fn extension_whitelist(mut self, extensions: Vec<String>) -> Self {
        self.extension_whitelist = Some(extensions);
        self
    }

    /// Enable the adaptive worker-scaling controller.
    pub fn dynamic_scaling(mut self, dynamic_scaling: bool) -> Self {
        self.dynamic_scaling = dynamic_scaling;
        self
    }

    /// Restrict the scan to metadata-like extensions.
    pub fn metadata_only(mut self, metadata_only: bool) -> Self {
        self.metadata_only = metadata_only;
        self
    }

    /// Set HTTP Basic credentials for archive.org requests.
    pub fn s3_credentials(mut self, access: impl Into<String>, secret: impl Into<String>) -> Self {
        self.s3_credentials = Some(Credentials {
            access: access.into(),
            secret: secret.into(),
        });
        self
    }

    /// Point the scanner and workers at a test double instead of archive.org.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Validate and build the `Config`.
    pub fn build(self) -> Result<Config> {
        if self.max_workers == 0 {
            return Err(Error::Config {
                message: "max_workers must be at least 1".to_string(),
            });
        }
        if let Some(pattern) = &self.filter_regex {
            regex::Regex::new(pattern).map_err(|e| Error::Config {
                message: format!("invalid filter_regex: {e}"),
            })?;
        }
        Ok(Config {
            output_dir: self.output_dir,
            max_workers: self.max_workers,
            speed_limit_bps: self.speed_limit_bps,
            sync_mode: self.sync_mode,
            filter_regex: self.filter_regex,
            extension_whitelist: self.extension_whitelist,
            dynamic_scaling: self.dynamic_scaling,
            metadata_only: self.metadata_only,
            s3_credentials: self.s3_credentials,
            api_base_url: self.api_base_url,
        })
    }
}

/// Connect timeout for every request (§5).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Queue pop timeout, used to poll for cancellation (§5).
pub const QUEUE_POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Chunk size used to stream a response body to a `.part` file (§4.6).
pub const STREAM_CHUNK_SIZE: usize = 128 * 1024;

/// Maximum number of attempts before a file is marked `failed` (§7).
pub const MAX_ATTEMPTS: u32 = 3;

/// User-Agent sent on every request (§6).
pub const USER_AGENT: &str = "grab-IA/2.0 (Archive Mirroring Tool; +https://github.com/grab-ia)";

/// Name of the on-disk log file, rooted at the process's working directory (§6).
pub const DEBUG_LOG_FILE: &str = "grabia_debug.log";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = Config::builder("/tmp/out").build().unwrap();
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.speed_limit_bps, 0);
        assert!(!cfg.sync_mode);
        assert!(cfg.filter_regex.is_none());
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::builder("/tmp/out").max_workers(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn bad_regex_rejected() {
        let err = Config::builder("/tmp/out").filter_regex("(unclosed").build();
        assert!(err.is_err());
    }

    #[test]
    fn state_db_path_is_rooted_at_output_dir() {
        let cfg = Config::builder("/tmp/out").build().unwrap();
        assert_eq!(cfg.state_db_path(), PathBuf::from("/tmp/out/grabia_state.db"));
    }
}
