use crate::modules::data_import::domain::authorization::AuthorizationSource;
use crate::modules::data_import::domain::input::{DatumStream, InputFormatRegistry};
use crate::modules::data_import::domain::loading::{
    BulkLoadingAdapter, LoadingContext, LoadingExceptionHandler, LoadingOptions,
};
use crate::modules::data_import::domain::types::{ProgressListener, ResourceHandle};
use crate::modules::jobs::domain::entities::{ImportJobStatus, JobKey};
use crate::modules::jobs::publisher::{PublishTarget, StatusPublisher, UpdateKind};
use crate::modules::jobs::task::ImportTask;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::{LogContext, TimedOperation};
use crate::{log_debug, log_error, log_info, log_warn};

use super::resource_orchestrator::ResourceOrchestrator;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a run managed to do before it stopped
#[derive(Debug)]
struct LoadSummary {
    loaded: u64,
    committed: u64,
    error: Option<AppError>,
}

impl LoadSummary {
    fn failed(error: AppError, committed: u64) -> Self {
        Self {
            loaded: committed,
            committed,
            error: Some(error),
        }
    }
}

/// Everything a run needs before the loading context is opened
struct PreparedImport {
    key: JobKey,
    allowed_node_ids: HashSet<i64>,
    import_date: DateTime<Utc>,
    options: LoadingOptions,
    stream: DatumStream,
}

/// Runs one import job from its resource into the storage engine
pub struct ImportExecutor {
    input_formats: Arc<InputFormatRegistry>,
    loader: Arc<dyn BulkLoadingAdapter>,
    authorization: Arc<dyn AuthorizationSource>,
    resources: Arc<ResourceOrchestrator>,
    publish_target: PublishTarget,
    progress_log_count: u64,
}

impl ImportExecutor {
    pub fn new(
        input_formats: Arc<InputFormatRegistry>,
        loader: Arc<dyn BulkLoadingAdapter>,
        authorization: Arc<dyn AuthorizationSource>,
        resources: Arc<ResourceOrchestrator>,
        publish_target: PublishTarget,
        progress_log_count: u64,
    ) -> Self {
        Self {
            input_formats,
            loader,
            authorization,
            resources,
            publish_target,
            progress_log_count,
        }
    }

    /// Run the import of `task` to completion.
    ///
    /// Always leaves the task `Completed`, with its terminal state persisted,
    /// whatever happens while loading. Callers serialize runs of one group.
    pub async fn execute(&self, task: Arc<ImportTask>, token: CancellationToken) -> ImportJobStatus {
        let key = task.key();
        let timer = TimedOperation::new("datum_import");

        task.ensure_publisher(|| StatusPublisher::spawn(self.publish_target.clone()));
        task.mark_executing();
        task.publish(UpdateKind::State);
        log_info!("Import job {} started", key);

        let summary = AssertUnwindSafe(self.run_import(&task, &token))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                LoadSummary::failed(
                    AppError::InternalError("Import engine failure".to_string()),
                    task.record().loaded_count,
                )
            });

        self.resources.cleanup(&key).await;

        let (success, message, loaded) = match summary.error {
            None => (
                true,
                format!("Loaded {} datum.", summary.loaded),
                summary.loaded,
            ),
            Some(e) => {
                log_error!(
                    "Import job {} failed after committing {} datum: {}",
                    key,
                    summary.committed,
                    e
                );
                (false, e.terminal_message(), summary.committed)
            }
        };

        task.complete(success, message, loaded);
        task.publish(UpdateKind::State);
        task.shutdown_publisher().await;

        let status = task.finish();
        timer.finish_with_info(&format!("job {}, {} datum", key, status.loaded_count));
        status
    }

    async fn run_import(&self, task: &Arc<ImportTask>, token: &CancellationToken) -> LoadSummary {
        // Cancelled while waiting for a worker
        if token.is_cancelled() {
            return LoadSummary::failed(AppError::Cancelled, 0);
        }
        match self.prepare(task).await {
            Ok(prepared) => self.load_prepared(task, token, prepared).await,
            Err(e) => LoadSummary::failed(e, 0),
        }
    }

    async fn prepare(&self, task: &Arc<ImportTask>) -> AppResult<PreparedImport> {
        let record = task.record();
        let key = record.key();

        let allowed_node_ids = self
            .authorization
            .authorized_node_ids(record.user_id)
            .await?;

        let adapter = self
            .input_formats
            .get(&record.configuration.input.service_identifier)?;

        let path = self.resources.ensure_local(&key).await?;
        let resource = ResourceHandle {
            path,
            content_type: record.resource_content_type.clone(),
        };

        let progress: ProgressListener = {
            let task = task.clone();
            Arc::new(move |fraction| {
                task.set_percent_complete(fraction);
                task.publish(UpdateKind::Progress);
            })
        };
        let stream = adapter
            .open(&record.configuration.input, resource, progress)
            .await?;

        let handler: LoadingExceptionHandler = Arc::new(move |e: &AppError| {
            log_warn!("Loading exception in import job {}: {}", key, e);
        });
        let options = LoadingOptions::for_batch_size(
            &record.configuration.name,
            record.configuration.batch_size,
        )
        .with_exception_handler(handler);
        log_debug!("Import job {} loading with {:?}", key, options);

        Ok(PreparedImport {
            key,
            allowed_node_ids,
            import_date: record.import_date,
            options,
            stream,
        })
    }

    async fn load_prepared(
        &self,
        task: &Arc<ImportTask>,
        token: &CancellationToken,
        prepared: PreparedImport,
    ) -> LoadSummary {
        let PreparedImport {
            key,
            allowed_node_ids,
            import_date,
            options,
            mut stream,
        } = prepared;

        let mut context = match self.loader.open(options).await {
            Ok(context) => context,
            Err(e) => return LoadSummary::failed(e, 0),
        };

        let result = match self
            .load_all(
                task,
                token,
                &allowed_node_ids,
                import_date,
                &mut stream,
                context.as_mut(),
            )
            .await
        {
            Ok(()) => context.commit().await,
            Err(e) => Err(e),
        };

        // Counts are read before closing, so partial success is still reported
        let summary = LoadSummary {
            loaded: context.loaded_count(),
            committed: context.committed_count(),
            error: result.err(),
        };

        drop(stream);
        if let Err(e) = context.close().await {
            log_warn!("Error closing loading context of import job {}: {}", key, e);
        }

        summary
    }

    async fn load_all(
        &self,
        task: &Arc<ImportTask>,
        token: &CancellationToken,
        allowed_node_ids: &HashSet<i64>,
        import_date: DateTime<Utc>,
        stream: &mut DatumStream,
        context: &mut dyn LoadingContext,
    ) -> AppResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AppError::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else {
                return Ok(());
            };

            let mut datum = item?;
            if !allowed_node_ids.contains(&datum.node_id) {
                return Err(AppError::AuthorizationDenied(datum.node_id));
            }
            datum.posted = Some(import_date);
            context.load(datum).await?;

            let loaded = context.loaded_count();
            task.set_loaded_count(loaded);
            if self.progress_log_count > 0 && loaded % self.progress_log_count == 0 {
                let record = task.record();
                LogContext::import_progress(
                    record.user_id,
                    &record.id,
                    loaded,
                    record.percent_complete,
                );
                task.publish(UpdateKind::Progress);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::data_import::domain::authorization::MockAuthorizationSource;
    use crate::modules::jobs::domain::entities::{
        ImportConfiguration, ImportRequest, InputConfiguration, JobRecord,
    };
    use crate::modules::jobs::domain::repository::ImportJobRepository;
    use crate::modules::jobs::domain::value_objects::JobState;
    use crate::modules::jobs::infrastructure::InMemoryJobRepository;
    use async_trait::async_trait;

    struct UnusedLoader;

    #[async_trait]
    impl BulkLoadingAdapter for UnusedLoader {
        async fn open(&self, _options: LoadingOptions) -> AppResult<Box<dyn LoadingContext>> {
            Err(AppError::InternalError("loader should not be opened".to_string()))
        }
    }

    async fn setup(
        authorization: MockAuthorizationSource,
    ) -> (ImportExecutor, Arc<InMemoryJobRepository>, Arc<ImportTask>) {
        let repository = Arc::new(InMemoryJobRepository::new());
        let record = JobRecord::new(
            7,
            &ImportRequest::new(ImportConfiguration::new(
                "test",
                InputConfiguration::new("CSV", "csv"),
            )),
        );
        repository.store(&record).await.unwrap();

        let executor = ImportExecutor::new(
            Arc::new(InputFormatRegistry::new()),
            Arc::new(UnusedLoader),
            Arc::new(authorization),
            Arc::new(ResourceOrchestrator::local(
                std::env::temp_dir().join(format!("datum-import-exec-{}", record.id)),
            )),
            PublishTarget::new(repository.clone(), None),
            10,
        );
        (executor, repository, Arc::new(ImportTask::new(record)))
    }

    #[tokio::test]
    async fn test_lookup_failure_still_completes_job() {
        let mut authorization = MockAuthorizationSource::new();
        authorization
            .expect_authorized_node_ids()
            .times(1)
            .returning(|_| Err(AppError::DatabaseError("nodes unavailable".to_string())));
        let (executor, repository, task) = setup(authorization).await;

        let status = executor.execute(task.clone(), CancellationToken::new()).await;

        assert_eq!(status.state, JobState::Completed);
        assert!(!status.success);
        assert_eq!(status.message.as_deref(), Some("nodes unavailable"));

        let stored = repository.get(&task.key()).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert!(!stored.success);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_no_work() {
        let mut authorization = MockAuthorizationSource::new();
        authorization.expect_authorized_node_ids().times(0);
        let (executor, _repository, task) = setup(authorization).await;

        let token = CancellationToken::new();
        token.cancel();
        let status = executor.execute(task, token).await;

        assert!(!status.success);
        assert_eq!(status.message.as_deref(), Some("Import cancelled."));
        assert_eq!(status.loaded_count, 0);
    }

    #[tokio::test]
    async fn test_missing_input_format_fails_run() {
        let mut authorization = MockAuthorizationSource::new();
        authorization
            .expect_authorized_node_ids()
            .returning(|_| Ok(HashSet::from([1])));
        let (executor, _repository, task) = setup(authorization).await;

        let status = executor.execute(task, CancellationToken::new()).await;

        assert!(!status.success);
        assert!(status.message.unwrap().contains("csv"));
    }
}
