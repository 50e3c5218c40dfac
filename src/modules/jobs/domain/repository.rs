/// Repository trait for durable import job records
///
/// The engine treats this as the record of truth whenever no live task exists
/// for a job, e.g. after a restart.
use crate::modules::jobs::domain::entities::{ImportConfiguration, JobKey, JobRecord};
use crate::modules::jobs::domain::value_objects::JobState;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ImportJobRepository: Send + Sync {
    /// Insert or replace a job record
    async fn store(&self, record: &JobRecord) -> AppResult<JobKey>;

    /// Get a job by owner and id
    async fn get(&self, key: &JobKey) -> AppResult<Option<JobRecord>>;

    /// Get all jobs of an owner, optionally restricted to some states
    async fn find_for_owner(
        &self,
        user_id: i64,
        states: Option<&[JobState]>,
    ) -> AppResult<Vec<JobRecord>>;

    /// Delete jobs of an owner whose state is one of `allowed_states`.
    /// With `ids` of `None` every matching job of the owner is deleted.
    async fn delete_for_owner(
        &self,
        user_id: i64,
        ids: Option<&[Uuid]>,
        allowed_states: &[JobState],
    ) -> AppResult<usize>;

    /// Atomically move the oldest `Queued` job to `Claimed` and return it
    async fn claim_queued(&self) -> AppResult<Option<JobRecord>>;

    /// Set the state of a job if its current state is one of `expected`
    /// (or unconditionally when `expected` is empty). Returns whether it changed.
    async fn update_state(
        &self,
        key: &JobKey,
        desired: JobState,
        expected: &[JobState],
    ) -> AppResult<bool>;

    /// Replace the configuration and group key of a job if its current state
    /// is one of `expected`. Returns whether it changed.
    async fn update_configuration(
        &self,
        key: &JobKey,
        configuration: &ImportConfiguration,
        group_key: &str,
        expected: &[JobState],
    ) -> AppResult<bool>;

    /// Record progress of a running job
    async fn update_progress(
        &self,
        key: &JobKey,
        percent_complete: f64,
        loaded_count: u64,
    ) -> AppResult<bool>;

    /// Delete completed jobs that finished before `cutoff`
    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;
}
