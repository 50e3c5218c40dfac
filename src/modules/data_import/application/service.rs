use crate::modules::data_import::domain::authorization::AuthorizationSource;
use crate::modules::data_import::domain::input::InputFormatRegistry;
use crate::modules::data_import::domain::loading::BulkLoadingAdapter;
use crate::modules::data_import::domain::services::import_components::{
    GroupLocks, ImportExecutor, PreviewEngine, ResourceOrchestrator,
};
use crate::modules::data_import::domain::storage::ResourceStorage;
use crate::modules::data_import::domain::types::{ImportResource, PreviewResults};
use crate::modules::jobs::domain::entities::{
    ImportConfiguration, ImportJobStatus, ImportRequest, JobKey, JobRecord, Receipt,
};
use crate::modules::jobs::domain::events::{JobNotifier, JobStatusEvent};
use crate::modules::jobs::domain::repository::ImportJobRepository;
use crate::modules::jobs::domain::value_objects::{JobState, DELETABLE_STATES};
use crate::modules::jobs::publisher::PublishTarget;
use crate::modules::jobs::registry::TaskRegistry;
use crate::modules::jobs::task::{ImportTask, RunHandle};
use crate::shared::config::ImportSettings;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::TimedOperation;
use crate::shared::utils::worker_pool::WorkerPool;
use crate::shared::validation::{ValidationChain, ValidationChainBuilder, ValidationContext};
use crate::{log_debug, log_info, log_warn};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything the engine talks to outside this crate
#[derive(Clone)]
pub struct ImportCollaborators {
    pub repository: Arc<dyn ImportJobRepository>,
    pub input_formats: InputFormatRegistry,
    pub loader: Arc<dyn BulkLoadingAdapter>,
    pub authorization: Arc<dyn AuthorizationSource>,
    pub resource_storage: Option<Arc<dyn ResourceStorage>>,
    pub notifier: Option<Arc<dyn JobNotifier>>,
}

/// Datum import service - submission, execution, preview and housekeeping
/// of import jobs
///
/// Delegates the work to the task registry, the executor, the preview engine
/// and the resource orchestrator.
pub struct DatumImportService {
    settings: ImportSettings,
    repository: Arc<dyn ImportJobRepository>,
    notifier: Option<Arc<dyn JobNotifier>>,
    registry: Arc<TaskRegistry>,
    input_formats: Arc<InputFormatRegistry>,
    resources: Arc<ResourceOrchestrator>,
    executor: Arc<ImportExecutor>,
    previews: Arc<PreviewEngine>,
    import_pool: WorkerPool,
    group_locks: Arc<GroupLocks>,
    validation: ValidationChain,
}

impl DatumImportService {
    pub fn new(settings: ImportSettings, collaborators: ImportCollaborators) -> Self {
        let ImportCollaborators {
            repository,
            input_formats,
            loader,
            authorization,
            resource_storage,
            notifier,
        } = collaborators;

        let input_formats = Arc::new(input_formats);
        let resources = Arc::new(ResourceOrchestrator::new(
            resource_storage,
            settings.resource_storage_enabled,
            settings.resource_storage_wait(),
            &settings.resource_key_prefix,
            settings.work_dir.clone(),
        ));
        let registry = Arc::new(TaskRegistry::new(
            repository.clone(),
            settings.completed_task_min_retention(),
        ));
        let executor = Arc::new(ImportExecutor::new(
            input_formats.clone(),
            loader,
            authorization.clone(),
            resources.clone(),
            PublishTarget::new(repository.clone(), notifier.clone()),
            settings.progress_log_count,
        ));
        let previews = Arc::new(PreviewEngine::new(
            input_formats.clone(),
            authorization,
            resources.clone(),
            settings.max_preview_count,
            settings
                .preview_pool_size
                .map(|size| WorkerPool::new("datum-preview", size)),
        ));
        let import_pool = WorkerPool::new("datum-import", settings.max_concurrent_imports);

        log_info!(
            "Datum import service ready: {} import workers, resource storage {}",
            import_pool.size(),
            if resources.is_storage_active() {
                "active"
            } else {
                "inactive"
            }
        );

        Self {
            settings,
            repository,
            notifier,
            registry,
            input_formats,
            resources,
            executor,
            previews,
            import_pool,
            group_locks: Arc::new(GroupLocks::new()),
            validation: ValidationChainBuilder::new().build_submission_chain(),
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Import workers not currently running a job
    pub fn idle_import_workers(&self) -> usize {
        self.import_pool.idle_workers()
    }

    /// Submit a new import job.
    ///
    /// The resource is saved locally, and archived when resource storage is
    /// active, before the job record is stored. Nothing becomes durable
    /// unless its data is safe.
    pub async fn submit_import_request(
        &self,
        user_id: i64,
        request: &ImportRequest,
        resource: ImportResource,
    ) -> AppResult<Receipt> {
        self.validate_configuration(&request.configuration).await?;
        let timer = TimedOperation::new("submit_import");

        let mut record = JobRecord::new(user_id, request);
        record.resource_content_type = Some(resource.content_type.clone());
        let key = record.key();

        self.resources.save_local(&key, &resource).await?;
        if let Err(e) = self.resources.archive(&key).await {
            self.resources.delete_local(&key).await;
            return Err(e);
        }
        if let Err(e) = self.repository.store(&record).await {
            self.resources.cleanup(&key).await;
            return Err(e);
        }

        let receipt = Receipt {
            job_id: record.id,
            state: record.state,
            group_key: record.group_key.clone(),
        };
        self.notify(&record);
        self.registry.merge(record);

        log_info!(
            "Import job {} submitted as {} ({} bytes)",
            key,
            receipt.state,
            resource.data.len()
        );
        timer.finish();
        Ok(receipt)
    }

    /// Start the import of a queued job.
    ///
    /// A job already executing, completed or scheduled in this process is
    /// returned as it is, without running again. So is a job that another
    /// claimer took between lookup and claim.
    pub async fn perform_import(&self, user_id: i64, job_id: Uuid) -> AppResult<Arc<ImportTask>> {
        let key = JobKey::new(user_id, job_id);
        let task = self.registry.task_for_id(&key).await?;

        match task.state() {
            JobState::Unknown | JobState::Staged => Err(AppError::ValidationError(format!(
                "Import job {} is {} and must be Queued to perform",
                key,
                task.state()
            ))),
            JobState::Executing | JobState::Completed => Ok(task),
            JobState::Queued | JobState::Claimed if task.is_scheduled() => Ok(task),
            JobState::Queued => self.claim_and_run(task).await,
            JobState::Claimed => {
                if !self.schedule_run(&task) {
                    log_debug!("Import job {} already has a run in this process", key);
                }
                Ok(task)
            }
        }
    }

    /// Claim the oldest queued job of any owner and start it
    pub async fn claim_queued_job(&self) -> AppResult<Option<Arc<ImportTask>>> {
        let Some(record) = self.repository.claim_queued().await? else {
            return Ok(None);
        };
        log_debug!("Claimed queued import job {}", record.key());

        let task = self.registry.merge(record);
        if !self.schedule_run(&task) {
            log_debug!("Import job {} already has a run in this process", task.key());
        }
        Ok(Some(task))
    }

    /// Claim a queued job in the repository, then run it. Only the winner of
    /// the claim attaches a run.
    async fn claim_and_run(&self, task: Arc<ImportTask>) -> AppResult<Arc<ImportTask>> {
        let key = task.key();
        let claimed = self
            .repository
            .update_state(&key, JobState::Claimed, &[JobState::Queued])
            .await?;

        if !claimed {
            let task = self.registry.task_for_id(&key).await?;
            return match task.state() {
                JobState::Claimed | JobState::Executing | JobState::Completed => {
                    log_debug!("Import job {} was claimed by another caller", key);
                    Ok(task)
                }
                state => Err(AppError::ValidationError(format!(
                    "Import job {} is {} and must be Queued to perform",
                    key, state
                ))),
            };
        }

        task.set_state(JobState::Claimed);
        self.schedule_run(&task);
        Ok(task)
    }

    /// Attach a run to a claimed task and hand it to the import pool.
    ///
    /// Returns false, starting nothing, when a run is already attached. The
    /// run waits for its group before taking a pool worker, so jobs held back
    /// by their group never occupy a worker.
    fn schedule_run(&self, task: &Arc<ImportTask>) -> bool {
        let handle = RunHandle::new(CancellationToken::new());
        if !task.attach_run(handle.clone()) {
            return false;
        }

        let executor = self.executor.clone();
        let pool = self.import_pool.clone();
        let group_locks = self.group_locks.clone();
        let run = task.clone();
        tokio::spawn(async move {
            let group_key = run.group_key();
            let group_guard = group_locks.lock(&group_key).await;
            pool.run(executor.execute(run, handle.token())).await;
            drop(group_guard);
            group_locks.release(&group_key);
        });
        true
    }

    /// Preview a staged job without loading anything
    pub async fn preview_staged_import(
        &self,
        user_id: i64,
        job_id: Uuid,
        count: usize,
    ) -> AppResult<PreviewResults> {
        let task = self.registry.task_for_id(&JobKey::new(user_id, job_id)).await?;
        self.previews.preview(task, count).await
    }

    pub async fn task(&self, user_id: i64, job_id: Uuid) -> AppResult<Arc<ImportTask>> {
        self.registry.task_for_id(&JobKey::new(user_id, job_id)).await
    }

    pub async fn job_status(&self, user_id: i64, job_id: Uuid) -> AppResult<ImportJobStatus> {
        Ok(self.task(user_id, job_id).await?.status())
    }

    /// Statuses of an owner's jobs, optionally restricted to some states
    pub async fn jobs_for_user(
        &self,
        user_id: i64,
        states: Option<&[JobState]>,
    ) -> AppResult<Vec<ImportJobStatus>> {
        let tasks = self.registry.tasks_for_owner(user_id, states).await?;
        Ok(tasks.iter().map(|task| task.status()).collect())
    }

    /// Block until a job completes
    pub async fn wait_for_job(
        &self,
        user_id: i64,
        job_id: Uuid,
        timeout: Option<Duration>,
    ) -> AppResult<ImportJobStatus> {
        self.task(user_id, job_id).await?.wait(timeout).await
    }

    /// Request cancellation of a scheduled run; false when nothing is running
    pub async fn cancel_import(&self, user_id: i64, job_id: Uuid) -> AppResult<bool> {
        let task = self.task(user_id, job_id).await?;
        let cancelled = task.cancel();
        if cancelled {
            log_info!("Cancellation requested for import job {}", task.key());
        }
        Ok(cancelled)
    }

    /// Move a job to `desired`, if it is in one of `expected` (any state when
    /// `None`). Executing and Completed are reserved for the engine.
    pub async fn update_job_state(
        &self,
        user_id: i64,
        job_id: Uuid,
        desired: JobState,
        expected: Option<&[JobState]>,
    ) -> AppResult<bool> {
        if matches!(
            desired,
            JobState::Unknown | JobState::Executing | JobState::Completed
        ) {
            return Err(AppError::ValidationError(format!(
                "Import job state cannot be set to {}",
                desired
            )));
        }

        let key = JobKey::new(user_id, job_id);
        let task = self.registry.task_for_id(&key).await?;
        let current = task.state();
        if let Some(expected) = expected {
            if !expected.contains(&current) {
                return Ok(false);
            }
        }
        if !current.can_transition_to(desired) {
            return Err(AppError::ValidationError(format!(
                "Import job {} cannot move from {} to {}",
                key, current, desired
            )));
        }

        let changed = self
            .repository
            .update_state(&key, desired, &[current])
            .await?;
        if changed {
            task.set_state(desired);
            self.notify(&task.record());
            log_info!("Import job {} moved from {} to {}", key, current, desired);
        }
        Ok(changed)
    }

    /// Replace the configuration of a job that has not started yet
    pub async fn update_job_configuration(
        &self,
        user_id: i64,
        job_id: Uuid,
        configuration: &ImportConfiguration,
    ) -> AppResult<ImportJobStatus> {
        self.validate_configuration(configuration).await?;

        const CHANGEABLE: [JobState; 2] = [JobState::Staged, JobState::Queued];
        let key = JobKey::new(user_id, job_id);
        let task = self.registry.task_for_id(&key).await?;
        let state = task.state();
        if !CHANGEABLE.contains(&state) || task.is_scheduled() {
            return Err(Self::configuration_locked(&key, state));
        }

        let group_key = configuration
            .group_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| task.group_key());
        let updated = self
            .repository
            .update_configuration(&key, configuration, &group_key, &CHANGEABLE)
            .await?;

        // Reload either way, so the task reflects whatever won
        let task = self.registry.task_for_id(&key).await?;
        if !updated {
            return Err(Self::configuration_locked(&key, task.state()));
        }

        let record = task.record();
        self.notify(&record);
        log_info!("Import job {} configuration updated", key);
        Ok(record.to_status())
    }

    fn configuration_locked(key: &JobKey, state: JobState) -> AppError {
        AppError::ValidationError(format!(
            "Import job {} is {} and its configuration can no longer change",
            key, state
        ))
    }

    /// Delete jobs of an owner, all of them when `ids` is `None`.
    ///
    /// Claimed and executing jobs are never deleted. Returns the statuses of
    /// the jobs actually deleted.
    pub async fn delete_jobs(
        &self,
        user_id: i64,
        ids: Option<&[Uuid]>,
    ) -> AppResult<Vec<ImportJobStatus>> {
        let wanted: Option<HashSet<Uuid>> = ids.map(|ids| ids.iter().copied().collect());
        let tasks = self.registry.tasks_for_owner(user_id, None).await?;

        let deletable: Vec<Arc<ImportTask>> = tasks
            .into_iter()
            .filter(|task| wanted.as_ref().map_or(true, |w| w.contains(&task.id())))
            .filter(|task| {
                let state = task.state();
                state.is_deletable() && (state.is_terminal() || !task.is_scheduled())
            })
            .collect();
        if deletable.is_empty() {
            return Ok(Vec::new());
        }

        let delete_ids: Vec<Uuid> = deletable.iter().map(|task| task.id()).collect();
        let deleted = self
            .repository
            .delete_for_owner(user_id, Some(&delete_ids), &DELETABLE_STATES)
            .await?;
        if deleted != delete_ids.len() {
            log_warn!(
                "Deleted {} of {} import jobs of user {}; some changed state meanwhile",
                deleted,
                delete_ids.len(),
                user_id
            );
        }

        let mut statuses = Vec::with_capacity(deletable.len());
        for task in deletable {
            let key = task.key();
            // Anything still in the repository changed state after we looked
            if self.repository.get(&key).await?.is_some() {
                continue;
            }
            self.registry.remove(&key.id);
            self.resources.cleanup(&key).await;
            statuses.push(task.status());
        }

        log_info!("Deleted {} import jobs of user {}", statuses.len(), user_id);
        Ok(statuses)
    }

    /// Drop completed tasks past their retention window from memory
    pub fn purge_completed_tasks(&self) -> usize {
        self.registry.purge_completed()
    }

    /// Delete completed job records that finished before `cutoff`
    pub async fn purge_old_jobs(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let purged = self.repository.purge_completed_before(cutoff).await?;
        if purged > 0 {
            log_info!("Purged {} completed import jobs older than {}", purged, cutoff);
        }
        Ok(purged)
    }

    /// Start periodic housekeeping; only the first call has an effect
    pub fn start_maintenance(&self) -> Option<JoinHandle<()>> {
        self.registry
            .start_purge_task(self.settings.purge_interval())
    }

    pub fn available_input_formats(&self) -> Vec<String> {
        self.input_formats.service_ids()
    }

    async fn validate_configuration(&self, configuration: &ImportConfiguration) -> AppResult<()> {
        let context = ValidationContext::new(configuration, self.input_formats.service_ids());
        let warnings = self.validation.validate(&context).await?.into_result()?;
        for warning in warnings {
            log_warn!("Import '{}': {}", configuration.name, warning);
        }
        Ok(())
    }

    fn notify(&self, record: &JobRecord) {
        if let Some(notifier) = &self.notifier {
            notifier.job_status_changed(JobStatusEvent::from(record));
        }
    }
}
