//! Engine façade: lifecycle and composition (§4's "Engine façade").
//!
//! Owns every shared component and wires them together. Consumers only
//! ever see [`Engine`]: construct it from a [`Config`] and an identifier
//! list, `start()` it, poll `stats()`/`logs()`, and `stop()` it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::BackoffCoordinator;
use crate::config::{Config, DEBUG_LOG_FILE};
use crate::db::Database;
use crate::error::Result;
use crate::http::build_client;
use crate::logging;
use crate::queue::TaskQueue;
use crate::rate_limiter::RateLimiter;
use crate::readme::{NoOpReadmeEmitter, ReadmeEmitter};
use crate::scaling::ScalingController;
use crate::scanner::Scanner;
use crate::telemetry::{Counters, LogRing, Telemetry};
use crate::types::{Identifier, Stats};
use crate::worker::Worker;

const SCANNER_SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Running handles for the scanner and worker pool, torn down by `stop()`.
struct RunState {
    scanner: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Top-level handle to one download job. Cheap to clone; every field is
/// `Arc`-wrapped or itself cheaply cloneable.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    db: Database,
    queue: Arc<TaskQueue>,
    rate_limiter: Arc<RateLimiter>,
    backoff: Arc<BackoffCoordinator>,
    counters: Arc<Counters>,
    scaling: Arc<ScalingController>,
    telemetry: Arc<Telemetry>,
    readme: Arc<dyn ReadmeEmitter>,
    client: reqwest::Client,
    cancel: CancellationToken,
    run_state: Arc<Mutex<Option<RunState>>>,
}

impl Engine {
    /// Build an engine over `config`, opening (or creating) its state
    /// store and installing the global logger. Uses a no-op README
    /// emitter unless [`Engine::with_readme_emitter`] is called first.
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let log_ring = Arc::new(LogRing::new());
        if let Err(err) = logging::init(&PathBuf::from(DEBUG_LOG_FILE), log_ring.clone()) {
            // A second Engine in the same process (e.g. in tests) will hit
            // this, since the global subscriber can only be installed once.
            eprintln!("grab-ia: logging already initialized ({err})");
        }

        let db = Database::new(&config.state_db_path()).await?;
        let client = build_client(&config)?;
        let queue = Arc::new(TaskQueue::new());
        let rate_limiter = Arc::new(RateLimiter::new(config.speed_limit_bps));
        let backoff = Arc::new(BackoffCoordinator::new());
        let counters = Arc::new(Counters::new(config.max_workers));
        let scaling = Arc::new(ScalingController::new(
            config.max_workers,
            config.dynamic_scaling,
            counters.clone(),
        ));
        let telemetry = Arc::new(Telemetry::new(
            counters.clone(),
            db.clone(),
            queue.clone(),
            backoff.clone(),
            log_ring,
            config.output_dir.clone(),
        ));

        Ok(Self {
            config,
            db,
            queue,
            rate_limiter,
            backoff,
            counters,
            scaling,
            telemetry,
            readme: Arc::new(NoOpReadmeEmitter),
            client,
            cancel: CancellationToken::new(),
            run_state: Arc::new(Mutex::new(None)),
        })
    }

    /// Wire in a README-emitting collaborator. Only effective before `start()`.
    pub fn with_readme_emitter(mut self, readme: Arc<dyn ReadmeEmitter>) -> Self {
        self.readme = readme;
        self
    }

    /// Access to the state store, primarily for resume planning
    /// (`pending_items`) before calling `start`.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Start the scanner and worker pool over `identifiers`. Returns once
    /// both are spawned, not once they finish.
    pub async fn start(&self, identifiers: Vec<Identifier>) -> Result<()> {
        let scanner = Scanner::new(
            self.client.clone(),
            self.config.clone(),
            self.db.clone(),
            self.queue.clone(),
            self.readme.clone(),
            self.counters.clone(),
        )?;

        let scanner_cancel = self.cancel.clone();
        let scanner_handle = tokio::spawn(async move {
            scanner.run(&identifiers, &scanner_cancel).await;
        });

        let spawned_workers = self.scaling.spawned_workers();
        let mut worker_handles = Vec::with_capacity(spawned_workers);
        for _ in 0..spawned_workers {
            let worker = Worker::new(
                self.client.clone(),
                self.config.clone(),
                self.db.clone(),
                self.queue.clone(),
                self.rate_limiter.clone(),
                self.backoff.clone(),
                self.counters.clone(),
                self.scaling.clone(),
            );
            let worker_cancel = self.cancel.clone();
            worker_handles.push(tokio::spawn(async move {
                worker.run(worker_cancel).await;
            }));
        }

        *self.run_state.lock().await = Some(RunState {
            scanner: scanner_handle,
            workers: worker_handles,
        });

        info!(workers = spawned_workers, "engine started");
        Ok(())
    }

    /// Signal cancellation, wait (briefly) for the scanner, and let
    /// workers drain in place (§5 "joins the scanner (2 s grace)").
    pub async fn stop(&self) {
        info!("stopping engine");
        self.cancel.cancel();

        let mut guard = self.run_state.lock().await;
        if let Some(state) = guard.take() {
            if tokio::time::timeout(SCANNER_SHUTDOWN_GRACE, state.scanner)
                .await
                .is_err()
            {
                warn!("scanner did not finish within the shutdown grace period");
            }
            for worker in state.workers {
                let _ = worker.await;
            }
        }
        info!("engine stopped");
    }

    /// Current stats snapshot (§4.8).
    pub async fn stats(&self) -> Stats {
        self.telemetry.stats().await
    }

    /// Log tail since `from_index` (§4.8).
    pub fn logs(&self, from_index: u64) -> (Vec<String>, u64) {
        self.telemetry.logs(from_index)
    }

    /// Runtime update of the bandwidth cap (§6).
    pub fn set_speed_limit_bps(&self, rate_bps: u64) {
        self.rate_limiter.set_rate_bps(rate_bps);
    }

    /// Runtime update of the worker-count ceiling (§6).
    pub fn set_max_workers(&self, max_workers: usize) {
        self.scaling.set_max_workers(max_workers);
    }
}
