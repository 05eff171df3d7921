//! Download worker (§4.6).
//!
//! Each worker loops until cancelled: wait out any active backoff, take a
//! permit from the scaling controller's semaphore, pop a task, run the
//! download protocol, and report the outcome to the state store, the
//! scaling controller, and telemetry.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::BackoffCoordinator;
use crate::config::{Config, MAX_ATTEMPTS, QUEUE_POP_TIMEOUT, STREAM_CHUNK_SIZE};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::http::with_basic_auth;
use crate::queue::TaskQueue;
use crate::rate_limiter::RateLimiter;
use crate::scaling::ScalingController;
use crate::telemetry::Counters;
use crate::types::{DownloadTask, Status};

const MD5_READ_BUFFER: usize = 4 * 1024;

/// An attempt's terminal outcome, short of success.
enum Attempt {
    /// Cancellation fired mid-transfer; the `.part` file is left for a
    /// future resume and this does not count against `attempt_count`.
    Cancelled,
    /// The attempt failed for a reason that does count.
    Failed(Error),
}

/// One download worker. Cheap to construct; typically one per pool slot,
/// all sharing the same queue/limiter/backoff/scaling handles.
pub struct Worker {
    client: Client,
    config: Arc<Config>,
    db: Database,
    queue: Arc<TaskQueue>,
    rate_limiter: Arc<RateLimiter>,
    backoff: Arc<BackoffCoordinator>,
    counters: Arc<Counters>,
    scaling: Arc<ScalingController>,
}

impl Worker {
    /// Construct a worker over the engine's shared components.
    pub fn new(
        client: Client,
        config: Arc<Config>,
        db: Database,
        queue: Arc<TaskQueue>,
        rate_limiter: Arc<RateLimiter>,
        backoff: Arc<BackoffCoordinator>,
        counters: Arc<Counters>,
        scaling: Arc<ScalingController>,
    ) -> Self {
        Self {
            client,
            config,
            db,
            queue,
            rate_limiter,
            backoff,
            counters,
            scaling,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.backoff.wait(&cancel).await;
            if cancel.is_cancelled() {
                return;
            }

            let permit = match self.scaling.semaphore().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let task = match self.queue.pop_timeout(QUEUE_POP_TIMEOUT).await {
                Some(task) => task,
                None => continue,
            };

            if task.attempt_count > 0 {
                let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                let secs = (2f64.powi(task.attempt_count as i32) + jitter).min(60.0);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
                    _ = cancel.cancelled() => {}
                }
            }

            match self.attempt(&task, &cancel).await {
                Ok(()) => {
                    self.counters.items_done.fetch_add(1, Ordering::SeqCst);
                    self.scaling.record_success();
                    info!(item_id = %task.item_id, file = %task.file_name, "download complete");
                }
                Err(Attempt::Cancelled) => {
                    info!(item_id = %task.item_id, file = %task.file_name, "cancelled, leaving part file for resume");
                }
                Err(Attempt::Failed(err)) => {
                    self.handle_failure(&task, err).await;
                    self.scaling.record_failure();
                }
            }

            self.queue.task_done();
            drop(permit);
        }
    }

    async fn handle_failure(&self, task: &DownloadTask, err: Error) {
        if task.attempt_count < MAX_ATTEMPTS {
            let next_attempt = task.attempt_count + 1;
            warn!(item_id = %task.item_id, file = %task.file_name, attempt = next_attempt, error = %err, "attempt failed, retrying");
            if let Err(db_err) = self
                .db
                .set_status(&task.item_id, &task.file_name, Status::Retrying, next_attempt)
                .await
            {
                warn!(error = %db_err, "state store write failed, download outcome not recorded");
            }
            self.queue.push(DownloadTask {
                attempt_count: next_attempt,
                ..task.clone()
            });
        } else {
            // attempt_count is already at MAX_ATTEMPTS; this attempt is not
            // counted again, it just settles the record as failed (§8
            // invariant: failed only ever coincides with attempt_count == 3).
            warn!(item_id = %task.item_id, file = %task.file_name, error = %err, "attempts exhausted, marking failed");
            if let Err(db_err) = self
                .db
                .set_status(&task.item_id, &task.file_name, Status::Failed, task.attempt_count)
                .await
            {
                warn!(error = %db_err, "state store write failed, download outcome not recorded");
            }
            self.counters.failed_files.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Run the full download protocol for one task (§4.6).
    async fn attempt(
        &self,
        task: &DownloadTask,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Attempt> {
        let final_path = self.config.item_dir(&task.item_id).join(&task.file_name);
        let mut part_os = final_path.clone().into_os_string();
        part_os.push(".part");
        let part_path = PathBuf::from(part_os);

        if self.config.sync_mode && final_path.exists() {
            match self.sync_fast_path(task, &final_path).await {
                Ok(true) => {
                    self.mark_done(task).await;
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => return Err(Attempt::Failed(err)),
            }
        }

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Attempt::Failed(Error::from(e)))?;
        }

        let mut resume_offset = match tokio::fs::metadata(&part_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let mut use_range = resume_offset > 0 && task.size > 0;

        let response = loop {
            let mut request = with_basic_auth(self.client.get(&task.file_url), &self.config)
                .header("X-Accept-Reduced-Priority", "1");
            if use_range {
                request = request.header("Range", format!("bytes={resume_offset}-"));
            }

            let response = request
                .send()
                .await
                .map_err(|e| Attempt::Failed(Error::from(e)))?;
            let status = response.status();

            if use_range && status == StatusCode::OK {
                let _ = tokio::fs::remove_file(&part_path).await;
                use_range = false;
                resume_offset = 0;
                continue;
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                let secs = rand::thread_rng().gen_range(30..=60);
                self.backoff.trigger(Duration::from_secs(secs));
                return Err(Attempt::Failed(Error::ServerPressure(status)));
            }
            if status == StatusCode::SERVICE_UNAVAILABLE {
                self.backoff.trigger(Duration::from_secs(60));
                return Err(Attempt::Failed(Error::ServerPressure(status)));
            }
            if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
                return Err(Attempt::Failed(Error::BadStatus(status)));
            }
            break response;
        };

        let append = response.status() == StatusCode::PARTIAL_CONTENT;
        let mut file = if append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&part_path)
                .await
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&part_path)
                .await
        }
        .map_err(|e| Attempt::Failed(Error::from(e)))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(Attempt::Cancelled);
            }
            let chunk = chunk.map_err(|e| Attempt::Failed(Error::from(e)))?;
            for piece in chunk.chunks(STREAM_CHUNK_SIZE) {
                if cancel.is_cancelled() {
                    return Err(Attempt::Cancelled);
                }
                if !self.rate_limiter.consume(piece.len() as u64, cancel).await {
                    return Err(Attempt::Cancelled);
                }
                file.write_all(piece)
                    .await
                    .map_err(|e| Attempt::Failed(Error::from(e)))?;
                self.counters.record_bytes(piece.len() as u64);
            }
        }
        file.flush().await.map_err(|e| Attempt::Failed(Error::from(e)))?;
        drop(file);

        let on_disk_size = tokio::fs::metadata(&part_path)
            .await
            .map_err(|e| Attempt::Failed(Error::from(e)))?
            .len();
        if task.size > 0 && on_disk_size != task.size {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(Attempt::Failed(Error::Integrity(format!(
                "size mismatch: expected {}, got {on_disk_size}",
                task.size
            ))));
        }

        if let Some(expected_md5) = &task.expected_md5 {
            let actual = Self::compute_md5(&part_path)
                .await
                .map_err(Attempt::Failed)?;
            if !actual.eq_ignore_ascii_case(expected_md5) {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(Attempt::Failed(Error::Integrity(
                    "md5 mismatch".to_string(),
                )));
            }
        }

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| Attempt::Failed(Error::from(e)))?;

        self.mark_done(task).await;
        Ok(())
    }

    async fn mark_done(&self, task: &DownloadTask) {
        if let Err(err) = self
            .db
            .set_status(&task.item_id, &task.file_name, Status::Done, task.attempt_count)
            .await
        {
            warn!(item_id = %task.item_id, file = %task.file_name, error = %err, "state store write failed after successful download");
        }
    }

    /// Sync-mode fast path (§4.6 a/b/c/d). Returns `Ok(true)` if the
    /// existing file already satisfies integrity checks.
    async fn sync_fast_path(&self, task: &DownloadTask, final_path: &Path) -> Result<bool> {
        let expected_md5 = match &task.expected_md5 {
            Some(md5) => Some(md5.clone()),
            None => self
                .db
                .get(&task.item_id, &task.file_name)
                .await?
                .and_then(|record| record.expected_md5),
        };

        if let Some(expected) = &expected_md5 {
            let actual = Self::compute_md5(final_path).await?;
            if actual.eq_ignore_ascii_case(expected) {
                return Ok(true);
            }
        }
        if task.size > 0 {
            if let Ok(meta) = tokio::fs::metadata(final_path).await {
                if meta.len() == task.size {
                    return Ok(true);
                }
            }
        } else if expected_md5.is_none() {
            return Ok(true);
        }
        Ok(false)
    }

    /// MD5 over a complete file, read in 4 KiB chunks (§4.6 closing note:
    /// never streamed alongside the network receive).
    async fn compute_md5(path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut ctx = md5::Context::new();
        let mut buf = [0u8; MD5_READ_BUFFER];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(format!("{:x}", ctx.compute()))
    }
}
