//! Error types for grab-ia
//!
//! Per-operation errors only: an HTTP call, a database call, a single
//! download attempt, configuration validation. None of these ever reach
//! the caller of [`crate::Engine::start`] — workers and the scanner fold
//! every failure here into a [`crate::types::Status`] transition and a
//! log line instead of propagating it.

use thiserror::Error;

/// Result type alias for grab-ia operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for grab-ia.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue.
        message: String,
    },

    /// State store operation failed.
    #[error("state store error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP request failed (connection, timeout, decode).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error touching the output tree or a `.part` file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive.org metadata document failed to parse.
    #[error("metadata parse error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Downloaded content failed size or MD5 verification.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Server responded with 429 or 503; the caller should trigger backoff
    /// and treat this attempt as failed, not retry inline.
    #[error("server pressure: HTTP {0}")]
    ServerPressure(reqwest::StatusCode),

    /// Server responded with something other than 200/206.
    #[error("unexpected HTTP status: {0}")]
    BadStatus(reqwest::StatusCode),
}

/// Errors that can be classified as transient-network (retryable without
/// counting as server pressure) versus everything else.
pub trait IsRetryable {
    /// Returns true if the error is a transient network failure: timeout,
    /// connection reset, DNS. Server pressure (429/503) and integrity
    /// failures are deliberately not retryable here — they're handled by
    /// the worker's explicit backoff/attempt-count logic instead.
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::ServerPressure(_) | Error::BadStatus(_) | Error::Integrity(_) => false,
            Error::Database(_) | Error::Metadata(_) | Error::Config { .. } => false,
        }
    }
}
