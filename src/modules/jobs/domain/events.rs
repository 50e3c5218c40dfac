use crate::modules::jobs::domain::entities::JobRecord;
use crate::modules::jobs::domain::value_objects::JobState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event posted whenever a job's status changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub user_id: i64,
    pub job_id: Uuid,
    pub state: JobState,
    pub percent_complete: f64,
    pub completion_date: Option<DateTime<Utc>>,
    pub success: bool,
    pub message: Option<String>,
}

impl From<&JobRecord> for JobStatusEvent {
    fn from(record: &JobRecord) -> Self {
        Self {
            user_id: record.user_id,
            job_id: record.id,
            state: record.state,
            percent_complete: record.percent_complete,
            completion_date: record.completed,
            success: record.success,
            message: record.message.clone(),
        }
    }
}

/// Fire-and-forget sink for job status events
#[cfg_attr(test, mockall::automock)]
pub trait JobNotifier: Send + Sync {
    fn job_status_changed(&self, event: JobStatusEvent);
}
