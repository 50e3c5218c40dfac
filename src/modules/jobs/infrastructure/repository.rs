/// In-memory implementation of ImportJobRepository
///
/// Suitable for a single process and for tests. Every operation takes the map
/// lock once, so claim and conditional state updates are atomic.
use crate::modules::jobs::domain::entities::{ImportConfiguration, JobKey, JobRecord};
use crate::modules::jobs::domain::repository::ImportJobRepository;
use crate::modules::jobs::domain::value_objects::JobState;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobKey, JobRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl ImportJobRepository for InMemoryJobRepository {
    async fn store(&self, record: &JobRecord) -> AppResult<JobKey> {
        let key = record.key();
        self.jobs.write().await.insert(key, record.clone());
        Ok(key)
    }

    async fn get(&self, key: &JobKey) -> AppResult<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(key).cloned())
    }

    async fn find_for_owner(
        &self,
        user_id: i64,
        states: Option<&[JobState]>,
    ) -> AppResult<Vec<JobRecord>> {
        let jobs = self.jobs.read().await;
        let mut found: Vec<JobRecord> = jobs
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| states.map_or(true, |s| s.contains(&r.state)))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created);
        Ok(found)
    }

    async fn delete_for_owner(
        &self,
        user_id: i64,
        ids: Option<&[Uuid]>,
        allowed_states: &[JobState],
    ) -> AppResult<usize> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|key, record| {
            let matches = key.user_id == user_id
                && ids.map_or(true, |ids| ids.contains(&key.id))
                && allowed_states.contains(&record.state);
            !matches
        });
        Ok(before - jobs.len())
    }

    async fn claim_queued(&self) -> AppResult<Option<JobRecord>> {
        let mut jobs = self.jobs.write().await;
        let oldest = jobs
            .values_mut()
            .filter(|r| r.state == JobState::Queued)
            .min_by_key(|r| r.created);

        Ok(oldest.map(|record| {
            record.state = JobState::Claimed;
            record.clone()
        }))
    }

    async fn update_state(
        &self,
        key: &JobKey,
        desired: JobState,
        expected: &[JobState],
    ) -> AppResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(key) {
            Some(record) if expected.is_empty() || expected.contains(&record.state) => {
                record.state = desired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_configuration(
        &self,
        key: &JobKey,
        configuration: &ImportConfiguration,
        group_key: &str,
        expected: &[JobState],
    ) -> AppResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(key) {
            Some(record) if expected.contains(&record.state) => {
                record.configuration = configuration.clone();
                record.group_key = group_key.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        key: &JobKey,
        percent_complete: f64,
        loaded_count: u64,
    ) -> AppResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(key) {
            Some(record) => {
                record.percent_complete = percent_complete;
                record.loaded_count = loaded_count;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| {
            !(record.state == JobState::Completed
                && record.completed.map_or(false, |c| c < cutoff))
        });
        Ok(before - jobs.len())
    }
}
