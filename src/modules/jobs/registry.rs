/// In-memory registry of live import tasks
///
/// Reconciles with the job repository: a task that is executing in this
/// process is authoritative, because the repository is only updated
/// asynchronously while a run is in progress. Otherwise the repository is
/// the source of truth and the cached task is refreshed from it.
use crate::modules::jobs::domain::entities::{JobKey, JobRecord};
use crate::modules::jobs::domain::repository::ImportJobRepository;
use crate::modules::jobs::domain::value_objects::JobState;
use crate::modules::jobs::task::ImportTask;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_info};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct TaskRegistry {
    tasks: DashMap<Uuid, Arc<ImportTask>>,
    repository: Arc<dyn ImportJobRepository>,
    min_retention: Duration,
    purge_task_started: AtomicBool,
}

impl TaskRegistry {
    pub fn new(repository: Arc<dyn ImportJobRepository>, min_retention: Duration) -> Self {
        Self {
            tasks: DashMap::new(),
            repository,
            min_retention,
            purge_task_started: AtomicBool::new(false),
        }
    }

    /// Resolve the task for a job, loading it from the repository unless it is
    /// executing here.
    pub async fn task_for_id(&self, key: &JobKey) -> AppResult<Arc<ImportTask>> {
        if let Some(task) = self.live_task(key) {
            if task.is_executing() {
                return Ok(task);
            }
        }

        let record = self
            .repository
            .get(key)
            .await?
            .ok_or(AppError::UnknownJob(key.id))?;

        Ok(self.merge(record))
    }

    /// Insert a task for `record`, or refresh the existing one in place.
    /// Concurrent callers all end up with the same task.
    pub fn merge(&self, record: JobRecord) -> Arc<ImportTask> {
        match self.tasks.entry(record.id) {
            Entry::Occupied(entry) => {
                let task = entry.get().clone();
                task.refresh(record);
                task
            }
            Entry::Vacant(entry) => entry.insert(Arc::new(ImportTask::new(record))).clone(),
        }
    }

    /// Cached task for a job, without consulting the repository
    pub fn live_task(&self, key: &JobKey) -> Option<Arc<ImportTask>> {
        self.tasks
            .get(&key.id)
            .map(|t| t.value().clone())
            .filter(|t| t.user_id() == key.user_id)
    }

    /// All tasks of an owner, as listed by the repository
    pub async fn tasks_for_owner(
        &self,
        user_id: i64,
        states: Option<&[JobState]>,
    ) -> AppResult<Vec<Arc<ImportTask>>> {
        let records = self.repository.find_for_owner(user_id, states).await?;
        Ok(records
            .into_iter()
            .map(|record| match self.live_task(&record.key()) {
                Some(task) if task.is_executing() => task,
                _ => self.merge(record),
            })
            .collect())
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<ImportTask>> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop completed tasks that finished longer ago than the retention window
    pub fn purge_completed(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.min_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let before = self.tasks.len();

        self.tasks.retain(|_, task| {
            let expired = task.state() == JobState::Completed
                && matches!((task.completed(), cutoff), (Some(done), Some(cutoff)) if done <= cutoff);
            !expired
        });

        let purged = before.saturating_sub(self.tasks.len());
        if purged > 0 {
            log_debug!("Purged {} completed import tasks", purged);
        }
        purged
    }

    /// Start the periodic purge (idempotent). The task stops once the
    /// registry is dropped.
    pub fn start_purge_task(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if self
            .purge_task_started
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        log_info!("Starting import task purge every {:?}", interval);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.purge_completed();
                    }
                    None => break,
                }
            }
        }))
    }
}
