/// Background worker that starts queued import jobs
///
/// Polls the job repository for queued jobs and claims one whenever an import
/// worker is free. Claiming is an atomic compare-and-set in the repository,
/// so several workers (or processes) never start the same job.
use crate::modules::data_import::application::service::DatumImportService;
use crate::shared::errors::AppResult;
use crate::{log_debug, log_error, log_info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct QueuedJobWorker {
    service: Arc<DatumImportService>,
    poll_interval: Duration,
    is_running: Arc<tokio::sync::RwLock<bool>>,
    shutdown: CancellationToken,
    claimed_jobs: AtomicU64,
    failed_polls: AtomicU64,
}

impl QueuedJobWorker {
    pub fn new(service: Arc<DatumImportService>) -> Self {
        let poll_interval = service.settings().queue_poll_interval();
        Self::with_poll_interval(service, poll_interval)
    }

    pub fn with_poll_interval(service: Arc<DatumImportService>, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_interval,
            is_running: Arc::new(tokio::sync::RwLock::new(false)),
            shutdown: CancellationToken::new(),
            claimed_jobs: AtomicU64::new(0),
            failed_polls: AtomicU64::new(0),
        }
    }

    /// Run the worker loop until `stop` is called. Spawn it with tokio::spawn
    /// to run in the background.
    ///
    /// A worker stopped before it started returns immediately.
    pub async fn run(self: Arc<Self>) {
        if self.shutdown.is_cancelled() {
            log_info!("Queued import worker stopped before starting");
            return;
        }
        *self.is_running.write().await = true;
        log_info!("Queued import worker started");

        while !self.shutdown.is_cancelled() {
            let idle = match self.start_next_job().await {
                // Try again right away, more jobs may be waiting
                Ok(true) => false,
                Ok(false) => true,
                Err(e) => {
                    self.failed_polls.fetch_add(1, Ordering::Relaxed);
                    log_error!("Error in queued import worker loop: {}", e);
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        *self.is_running.write().await = false;
        log_info!("Queued import worker stopped");
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        log_info!("Queued import worker stop requested");
    }

    /// Claim and start one queued job if an import worker is free.
    ///
    /// Returns true if a job was started.
    pub async fn start_next_job(&self) -> AppResult<bool> {
        if self.service.idle_import_workers() == 0 {
            log_debug!("All import workers busy, not claiming");
            return Ok(false);
        }

        match self.service.claim_queued_job().await? {
            Some(task) => {
                self.claimed_jobs.fetch_add(1, Ordering::Relaxed);
                log_info!("Started queued import job {}", task.key());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_statistics(&self) -> WorkerStatistics {
        WorkerStatistics {
            is_running: *self.is_running.read().await,
            claimed_jobs: self.claimed_jobs.load(Ordering::Relaxed),
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
            idle_import_workers: self.service.idle_import_workers(),
        }
    }
}

/// Worker statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatistics {
    pub is_running: bool,
    pub claimed_jobs: u64,
    pub failed_polls: u64,
    pub idle_import_workers: usize,
}
