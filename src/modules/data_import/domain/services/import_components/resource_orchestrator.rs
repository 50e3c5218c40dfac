use crate::modules::data_import::domain::storage::ResourceStorage;
use crate::modules::data_import::domain::types::{ImportResource, ProgressListener};
use crate::modules::jobs::domain::entities::JobKey;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::{LogContext, TimedOperation};
use crate::{log_debug, log_info, log_warn};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Keeps the working copy of each submitted resource on local disk and,
/// when resource storage is available, an archived copy there too.
///
/// The local file is the hard guarantee. Archiving is best-effort once
/// submission has succeeded: every storage wait is bounded.
pub struct ResourceOrchestrator {
    storage: Option<Arc<dyn ResourceStorage>>,
    enabled: bool,
    wait: Option<Duration>,
    key_prefix: String,
    work_dir: PathBuf,
}

impl ResourceOrchestrator {
    pub fn new(
        storage: Option<Arc<dyn ResourceStorage>>,
        enabled: bool,
        wait: Option<Duration>,
        key_prefix: &str,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            storage,
            enabled,
            wait,
            key_prefix: key_prefix.to_string(),
            work_dir,
        }
    }

    /// Local-only orchestrator
    pub fn local(work_dir: PathBuf) -> Self {
        Self::new(None, false, None, "", work_dir)
    }

    pub fn local_path(&self, key: &JobKey) -> PathBuf {
        self.work_dir.join(format!("{}-{}", key.user_id, key.id))
    }

    pub fn resource_name(&self, key: &JobKey) -> String {
        format!("{}{}-{}", self.key_prefix, key.user_id, key.id)
    }

    fn active_storage(&self) -> Option<Arc<dyn ResourceStorage>> {
        self.storage
            .as_ref()
            .filter(|s| self.enabled && s.is_configured())
            .cloned()
    }

    pub fn is_storage_active(&self) -> bool {
        self.active_storage().is_some()
    }

    /// Write the submitted resource to the working directory
    pub async fn save_local(&self, key: &JobKey, resource: &ImportResource) -> AppResult<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = self.local_path(key);
        tokio::fs::write(&path, &resource.data).await?;
        log_debug!(
            "Saved import resource {} ({} bytes) to {}",
            resource.name,
            resource.data.len(),
            path.display()
        );
        Ok(path)
    }

    pub async fn local_exists(&self, key: &JobKey) -> bool {
        tokio::fs::try_exists(self.local_path(key))
            .await
            .unwrap_or(false)
    }

    /// Upload the working copy to resource storage.
    ///
    /// The upload runs on its own task. With a wait budget, this blocks up to
    /// that long for the outcome: a timeout or an interrupted upload is logged
    /// and ignored, while any other failure is returned.
    pub async fn archive(&self, key: &JobKey) -> AppResult<()> {
        let Some(storage) = self.active_storage() else {
            return Ok(());
        };

        let data = tokio::fs::read(self.local_path(key)).await?;
        let name = self.resource_name(key);
        let timer = TimedOperation::new("archive_import_resource");
        LogContext::storage_operation("save", &name, None);

        let upload_name = name.clone();
        let progress: ProgressListener = {
            let name = name.clone();
            Arc::new(move |fraction| {
                log_debug!("Upload of {} {:.0}% complete", name, fraction * 100.0);
            })
        };
        let upload = tokio::spawn(async move {
            let result = storage.save(&upload_name, data, true, Some(progress)).await;
            if let Err(e) = &result {
                LogContext::error_with_context(e, &format!("Failed to save resource {}", upload_name));
            }
            result
        });

        let Some(wait) = self.wait else {
            log_debug!("Not waiting for upload of {}", name);
            return Ok(());
        };

        match tokio::time::timeout(wait, upload).await {
            Err(_) => {
                log_warn!(
                    "Timeout waiting {:?} for import resource {} to be saved; continuing",
                    wait,
                    name
                );
                Ok(())
            }
            Ok(Err(e)) if e.is_cancelled() => {
                log_warn!("Upload of import resource {} interrupted; continuing", name);
                Ok(())
            }
            Ok(Err(e)) => Err(AppError::StorageError(format!(
                "Error saving import resource {}: {}",
                name, e
            ))),
            Ok(Ok(Ok(true))) => {
                LogContext::storage_operation("save", &name, Some(timer.finish()));
                Ok(())
            }
            Ok(Ok(Ok(false))) => Err(AppError::StorageError(format!(
                "Import resource {} was not saved",
                name
            ))),
            Ok(Ok(Err(e))) => Err(e),
        }
    }

    /// Path of the working copy, fetching it back from resource storage if
    /// the local file is gone.
    pub async fn ensure_local(&self, key: &JobKey) -> AppResult<PathBuf> {
        let path = self.local_path(key);
        if self.local_exists(key).await {
            return Ok(path);
        }

        let storage = self.active_storage().ok_or_else(|| {
            AppError::StorageError(format!("Import resource for job {} not available", key))
        })?;

        let name = self.resource_name(key);
        log_info!("Fetching import resource {} from storage", name);
        LogContext::storage_operation("fetch", &name, None);
        let timer = TimedOperation::new("fetch_import_resource");
        let lookup = async {
            let resources = storage.list(&name).await?;
            resources
                .into_iter()
                .find(|r| r.name == name)
                .ok_or_else(|| {
                    AppError::StorageError(format!("Import resource {} not found in storage", name))
                })
        };
        let resource = self.bounded(&format!("fetch of {}", name), lookup).await?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        tokio::fs::write(&path, &resource.data).await?;
        LogContext::storage_operation("fetch", &name, Some(timer.finish()));
        Ok(path)
    }

    /// Delete the working copy; failures are logged only
    pub async fn delete_local(&self, key: &JobKey) {
        let path = self.local_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log_debug!("Deleted import resource {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log_warn!("Unable to delete import resource {}: {}", path.display(), e),
        }
    }

    /// Delete the archived copy; failures and timeouts are logged only
    pub async fn delete_archived(&self, key: &JobKey) {
        let Some(storage) = self.active_storage() else {
            return;
        };

        let name = self.resource_name(key);
        let names = vec![name.clone()];
        let delete = tokio::spawn(async move { storage.delete(&names).await });

        let Some(wait) = self.wait else {
            return;
        };
        match tokio::time::timeout(wait, delete).await {
            Ok(Ok(Ok(deleted))) if deleted.contains(&name) => {
                log_debug!("Deleted archived import resource {}", name)
            }
            Ok(Ok(Ok(_))) => log_warn!("Archived import resource {} was not deleted", name),
            Ok(Ok(Err(e))) => log_warn!("Error deleting archived import resource {}: {}", name, e),
            Ok(Err(e)) => log_warn!("Delete of archived import resource {} failed: {}", name, e),
            Err(_) => log_warn!(
                "Timeout waiting {:?} for archived import resource {} to be deleted",
                wait,
                name
            ),
        }
    }

    /// Remove both copies of a job's resource
    pub async fn cleanup(&self, key: &JobKey) {
        self.delete_local(key).await;
        self.delete_archived(key).await;
    }

    async fn bounded<T, F>(&self, what: &str, operation: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match self.wait {
            Some(wait) => tokio::time::timeout(wait, operation).await.map_err(|_| {
                AppError::StorageTimeout(format!("Timeout waiting {:?} for {}", wait, what))
            })?,
            None => operation.await,
        }
    }
}
