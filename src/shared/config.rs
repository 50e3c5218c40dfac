//! Engine settings, read from `DATUM_IMPORT_*` environment variables.

use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::worker_pool::WorkerPool;
use crate::log_info;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_PREVIEW_COUNT: usize = 100;
pub const DEFAULT_RESOURCE_STORAGE_WAIT_MS: u64 = 60_000;
pub const DEFAULT_RESOURCE_KEY_PREFIX: &str = "datum-import/";
pub const DEFAULT_TASK_RETENTION_SECS: u64 = 4 * 60 * 60;
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_PROGRESS_LOG_COUNT: u64 = 25_000;
pub const DEFAULT_QUEUE_POLL_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Directory holding the working copy of each submitted resource
    pub work_dir: PathBuf,
    pub max_concurrent_imports: usize,
    /// When unset, previews run on the calling task
    pub preview_pool_size: Option<usize>,
    pub max_preview_count: usize,
    /// How long to block on resource storage; 0 means do not wait
    pub resource_storage_wait_ms: u64,
    pub resource_storage_enabled: bool,
    pub resource_key_prefix: String,
    pub completed_task_min_retention_secs: u64,
    pub purge_interval_secs: u64,
    pub progress_log_count: u64,
    pub queue_poll_interval_ms: u64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            work_dir: env::temp_dir().join("datum-import"),
            max_concurrent_imports: WorkerPool::calculate_default_size(),
            preview_pool_size: None,
            max_preview_count: DEFAULT_MAX_PREVIEW_COUNT,
            resource_storage_wait_ms: DEFAULT_RESOURCE_STORAGE_WAIT_MS,
            resource_storage_enabled: true,
            resource_key_prefix: DEFAULT_RESOURCE_KEY_PREFIX.to_string(),
            completed_task_min_retention_secs: DEFAULT_TASK_RETENTION_SECS,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
            progress_log_count: DEFAULT_PROGRESS_LOG_COUNT,
            queue_poll_interval_ms: DEFAULT_QUEUE_POLL_MS,
        }
    }
}

impl ImportSettings {
    /// Load settings from the environment (and a `.env` file, if present),
    /// falling back to defaults for anything unset.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let settings = Self {
            work_dir: env::var("DATUM_IMPORT_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_imports: read_var("DATUM_IMPORT_MAX_CONCURRENT")?
                .unwrap_or(defaults.max_concurrent_imports),
            preview_pool_size: read_var("DATUM_IMPORT_PREVIEW_POOL_SIZE")?,
            max_preview_count: read_var("DATUM_IMPORT_MAX_PREVIEW_COUNT")?
                .unwrap_or(defaults.max_preview_count),
            resource_storage_wait_ms: read_var("DATUM_IMPORT_RESOURCE_STORAGE_WAIT_MS")?
                .unwrap_or(defaults.resource_storage_wait_ms),
            resource_storage_enabled: read_var("DATUM_IMPORT_RESOURCE_STORAGE_ENABLED")?
                .unwrap_or(defaults.resource_storage_enabled),
            resource_key_prefix: env::var("DATUM_IMPORT_RESOURCE_KEY_PREFIX")
                .unwrap_or(defaults.resource_key_prefix),
            completed_task_min_retention_secs: read_var("DATUM_IMPORT_TASK_RETENTION_SECS")?
                .unwrap_or(defaults.completed_task_min_retention_secs),
            purge_interval_secs: read_var("DATUM_IMPORT_PURGE_INTERVAL_SECS")?
                .unwrap_or(defaults.purge_interval_secs),
            progress_log_count: read_var("DATUM_IMPORT_PROGRESS_LOG_COUNT")?
                .unwrap_or(defaults.progress_log_count),
            queue_poll_interval_ms: read_var("DATUM_IMPORT_QUEUE_POLL_MS")?
                .unwrap_or(defaults.queue_poll_interval_ms),
        };

        log_info!(
            "Import settings loaded: work_dir={}, max_concurrent_imports={}, preview_pool_size={:?}",
            settings.work_dir.display(),
            settings.max_concurrent_imports,
            settings.preview_pool_size
        );

        Ok(settings)
    }

    /// Wait budget for resource storage, or `None` to not wait at all
    pub fn resource_storage_wait(&self) -> Option<Duration> {
        match self.resource_storage_wait_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn completed_task_min_retention(&self) -> Duration {
        Duration::from_secs(self.completed_task_min_retention_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(1))
    }
}

fn read_var<T: FromStr>(name: &str) -> AppResult<Option<T>> {
    match env::var(name) {
        Ok(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::ValidationError(format!("Invalid value for {}: {}", name, value))
        }),
        Err(_) => Ok(None),
    }
}
