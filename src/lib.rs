//! # grab-ia
//!
//! Concurrent bulk downloader for Internet Archive items.
//!
//! ## Design Philosophy
//!
//! grab-ia is designed to be:
//! - **Library-first** — no CLI or UI here; those are external collaborators
//! - **Resumable** — a crash-safe state store means interrupted jobs pick
//!   up where they left off instead of re-downloading completed work
//! - **Polite** — a single rate limiter and a global backoff coordinator
//!   keep the whole job well-behaved under server pressure
//! - **Observable** — a polling telemetry surface and a bounded log tail,
//!   no event subscription required
//!
//! ## Quick Start
//!
//! ```no_run
//! use grab_ia::{Config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder("./downloads")
//!         .max_workers(8)
//!         .build()?;
//!
//!     let engine = Engine::new(config).await?;
//!     engine.start(vec!["nasa-images".to_string()]).await?;
//!
//!     loop {
//!         let stats = engine.stats().await;
//!         if !stats.scanner_active && stats.queue_depth == 0 {
//!             break;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Process-wide pause barrier triggered by server pressure
pub mod backoff;
/// Configuration types
pub mod config;
/// Crash-safe state store
pub mod db;
/// Disk space reporting
pub mod disk_space;
/// Lifecycle and composition
pub mod engine;
/// Error types
pub mod error;
/// Shared HTTP client construction
pub mod http;
/// Structured logging, teed to the log ring
pub mod logging;
/// Priority task queue
pub mod queue;
/// Token-bucket bandwidth throttle
pub mod rate_limiter;
/// README-emitter collaborator hook
pub mod readme;
/// Adaptive worker-count scaling
pub mod scaling;
/// Metadata scanner
pub mod scanner;
/// Stats snapshot and log tail
pub mod telemetry;
/// Core data types
pub mod types;
/// Download worker
pub mod worker;

// Re-export commonly used types.
pub use config::{Config, ConfigBuilder, Credentials};
pub use db::Database;
pub use engine::Engine;
pub use error::{Error, IsRetryable, Result};
pub use readme::{NoOpReadmeEmitter, ReadmeEmitter};
pub use types::{DownloadTask, FileRecord, Identifier, Stats, Status, StatusCounts};

/// Run `engine` until a termination signal arrives, then call
/// [`Engine::stop`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with a `ctrl_c` fallback if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use grab_ia::{Config, Engine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::builder("./downloads").build()?;
///     let engine = Engine::new(config).await?;
///     engine.start(vec!["nasa-images".to_string()]).await?;
///
///     run_with_shutdown(&engine).await;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: &Engine) {
    wait_for_signal().await;
    engine.stop().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT");
            } else {
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
