/// Live, process-local view of one import job
///
/// A task composes three things: the latest job record, a cancellable run
/// handle (present once the job has been scheduled) and an outcome channel
/// that callers can wait on.
use crate::modules::jobs::domain::entities::{ImportJobStatus, JobKey, JobRecord};
use crate::modules::jobs::domain::value_objects::JobState;
use crate::modules::jobs::publisher::{StatusPublisher, StatusUpdate, UpdateKind};
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Handle on a scheduled run
#[derive(Debug, Clone)]
pub struct RunHandle {
    token: CancellationToken,
}

impl RunHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

pub struct ImportTask {
    record: RwLock<JobRecord>,
    run: Mutex<Option<RunHandle>>,
    publisher: Mutex<Option<StatusPublisher>>,
    outcome: watch::Sender<Option<ImportJobStatus>>,
}

impl ImportTask {
    pub fn new(record: JobRecord) -> Self {
        let initial = record.state.is_terminal().then(|| record.to_status());
        let (outcome, _) = watch::channel(initial);
        Self {
            record: RwLock::new(record),
            run: Mutex::new(None),
            publisher: Mutex::new(None),
            outcome,
        }
    }

    // Lock poisoning only means another thread panicked mid-update; the
    // record itself is still a complete value.
    fn read(&self) -> RwLockReadGuard<'_, JobRecord> {
        self.record.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobRecord> {
        self.record.write().unwrap_or_else(|e| e.into_inner())
    }

    fn run_slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publisher_slot(&self) -> MutexGuard<'_, Option<StatusPublisher>> {
        self.publisher.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self) -> JobKey {
        self.read().key()
    }

    pub fn user_id(&self) -> i64 {
        self.read().user_id
    }

    pub fn id(&self) -> uuid::Uuid {
        self.read().id
    }

    pub fn group_key(&self) -> String {
        self.read().group_key.clone()
    }

    pub fn state(&self) -> JobState {
        self.read().state
    }

    /// Executing in this process. A record that merely says `Executing`, e.g.
    /// one left behind by a previous process, does not count.
    pub fn is_executing(&self) -> bool {
        self.state() == JobState::Executing && self.is_scheduled()
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.read().completed
    }

    /// Copy of the current record
    pub fn record(&self) -> JobRecord {
        self.read().clone()
    }

    pub fn status(&self) -> ImportJobStatus {
        self.read().to_status()
    }

    /// Replace the record with one loaded from the repository.
    ///
    /// Ignored while executing here, since the live task is ahead of the
    /// repository then, and once completed, since the terminal result never
    /// changes.
    pub fn refresh(&self, record: JobRecord) -> bool {
        let scheduled = self.is_scheduled();
        let completed = {
            let mut current = self.write();
            if (scheduled && current.state == JobState::Executing) || current.state.is_terminal() {
                return false;
            }
            *current = record;
            current.state.is_terminal().then(|| current.to_status())
        };
        if let Some(status) = completed {
            self.outcome.send_replace(Some(status));
        }
        true
    }

    /// Set the in-memory state after the repository accepted the transition
    pub fn set_state(&self, state: JobState) {
        self.write().state = state;
    }

    /// Attach a run handle. Only the first caller succeeds, so a job is never
    /// scheduled twice in this process.
    pub fn attach_run(&self, handle: RunHandle) -> bool {
        let mut slot = self.run_slot();
        if slot.is_some() {
            return false;
        }
        *slot = Some(handle);
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.run_slot().is_some()
    }

    /// Request cancellation of the run. Best-effort: a load already inside the
    /// storage engine finishes first.
    pub fn cancel(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        match self.run_slot().as_ref() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.run_slot().as_ref().map_or(false, RunHandle::is_cancelled)
    }

    pub fn mark_executing(&self) -> JobRecord {
        let mut record = self.write();
        record.state = JobState::Executing;
        record.started = Some(Utc::now());
        record.clone()
    }

    pub fn set_percent_complete(&self, fraction: f64) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.write().percent_complete = fraction;
    }

    /// Loaded count never decreases while the run is live
    pub fn set_loaded_count(&self, loaded: u64) {
        let mut record = self.write();
        if loaded > record.loaded_count {
            record.loaded_count = loaded;
        }
    }

    /// Record the terminal result. A completed task is never changed again.
    pub fn complete(&self, success: bool, message: String, loaded_count: u64) -> JobRecord {
        let mut record = self.write();
        if record.state.is_terminal() {
            return record.clone();
        }
        record.state = JobState::Completed;
        record.completed = Some(Utc::now());
        record.success = success;
        record.message = Some(message);
        record.loaded_count = loaded_count;
        if success {
            record.percent_complete = 1.0;
        }
        record.clone()
    }

    /// Wake everyone waiting on the outcome
    pub fn finish(&self) -> ImportJobStatus {
        let status = self.status();
        self.outcome.send_replace(Some(status.clone()));
        status
    }

    /// Wait for the run to complete, optionally giving up after `timeout`
    pub async fn wait(&self, timeout: Option<Duration>) -> AppResult<ImportJobStatus> {
        let mut receiver = self.outcome.subscribe();
        let done = async move {
            loop {
                if let Some(status) = receiver.borrow_and_update().clone() {
                    return Ok(status);
                }
                if receiver.changed().await.is_err() {
                    return Err(AppError::InternalError(
                        "Import task dropped before completing".to_string(),
                    ));
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, done).await.map_err(|_| {
                AppError::Timeout(format!("Import job {} not complete after {:?}", self.id(), limit))
            })?,
            None => done.await,
        }
    }

    /// Start the status sequencer unless it is already running
    pub fn ensure_publisher<F>(&self, spawn: F)
    where
        F: FnOnce() -> StatusPublisher,
    {
        let mut slot = self.publisher_slot();
        if slot.is_none() {
            *slot = Some(spawn());
        }
    }

    /// Queue a snapshot of the current record for persistence
    pub fn publish(&self, kind: UpdateKind) -> bool {
        let record = self.record();
        match self.publisher_slot().as_ref() {
            Some(publisher) => publisher.publish(StatusUpdate { kind, record }),
            None => false,
        }
    }

    /// Stop the sequencer after it has written everything queued so far
    pub async fn shutdown_publisher(&self) {
        let publisher = self.publisher_slot().take();
        if let Some(publisher) = publisher {
            publisher.shutdown().await;
        }
    }
}

impl std::fmt::Debug for ImportTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.read();
        f.debug_struct("ImportTask")
            .field("key", &record.key())
            .field("state", &record.state)
            .field("loaded_count", &record.loaded_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::domain::entities::{
        ImportConfiguration, ImportRequest, InputConfiguration,
    };
    use std::sync::Arc;

    fn task(stage: bool) -> ImportTask {
        let mut config = ImportConfiguration::new("test", InputConfiguration::new("CSV", "csv"));
        config.stage = stage;
        ImportTask::new(JobRecord::new(1, &ImportRequest::new(config)))
    }

    #[test]
    fn test_attach_run_only_once() {
        let task = task(false);
        assert!(task.attach_run(RunHandle::new(CancellationToken::new())));
        assert!(!task.attach_run(RunHandle::new(CancellationToken::new())));
        assert!(task.is_scheduled());
    }

    #[test]
    fn test_refresh_ignored_while_executing() {
        let task = task(false);
        let mut stale = task.record();
        task.attach_run(RunHandle::new(CancellationToken::new()));
        task.mark_executing();
        assert!(task.is_executing());

        stale.loaded_count = 99;
        assert!(!task.refresh(stale));
        assert_eq!(task.state(), JobState::Executing);
        assert_eq!(task.record().loaded_count, 0);
    }

    #[test]
    fn test_executing_record_without_run_is_refreshed() {
        let task = task(false);
        let mut leftover = task.record();
        leftover.state = JobState::Executing;
        let task = ImportTask::new(leftover.clone());
        assert!(!task.is_executing());

        leftover.state = JobState::Completed;
        leftover.message = Some("Loaded 3 datum.".to_string());
        assert!(task.refresh(leftover));
        assert_eq!(task.state(), JobState::Completed);
    }

    #[test]
    fn test_completed_is_immutable() {
        let task = task(false);
        task.mark_executing();
        let done = task.complete(true, "Loaded 5 datum.".to_string(), 5);
        assert_eq!(done.state, JobState::Completed);

        let again = task.complete(false, "boom".to_string(), 0);
        assert!(again.success);
        assert_eq!(again.message.as_deref(), Some("Loaded 5 datum."));
        assert_eq!(again.completed, done.completed);

        let mut older = done.clone();
        older.state = JobState::Queued;
        assert!(!task.refresh(older));
        assert_eq!(task.state(), JobState::Completed);
    }

    #[test]
    fn test_loaded_count_never_decreases_during_run() {
        let task = task(false);
        task.mark_executing();
        task.set_loaded_count(10);
        task.set_loaded_count(4);
        assert_eq!(task.record().loaded_count, 10);
    }

    #[test]
    fn test_percent_complete_clamped() {
        let task = task(false);
        task.set_percent_complete(1.5);
        assert_eq!(task.record().percent_complete, 1.0);
        task.set_percent_complete(f64::NAN);
        assert_eq!(task.record().percent_complete, 0.0);
    }

    #[test]
    fn test_cancel_requires_run() {
        let task = task(false);
        assert!(!task.cancel());

        task.attach_run(RunHandle::new(CancellationToken::new()));
        assert!(task.cancel());
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_times_out_then_completes() {
        let task = Arc::new(task(false));

        let result = task.wait(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(AppError::Timeout(_))));

        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.wait(None).await })
        };

        task.mark_executing();
        task.complete(true, "Loaded 1 datum.".to_string(), 1);
        task.finish();

        let status = waiter.await.unwrap().unwrap();
        assert!(status.success);
        assert_eq!(status.loaded_count, 1);
    }

    #[tokio::test]
    async fn test_task_for_completed_record_is_already_done() {
        let task = task(false);
        let mut record = task.record();
        record.state = JobState::Completed;
        record.success = true;

        let done = ImportTask::new(record);
        let status = done.wait(Some(Duration::from_millis(10))).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
    }
}
