/// Domain entities for datum import jobs
///
/// A job is one durable request to turn an uploaded resource into datum loaded
/// into storage. The record is owned by a user and identified by a random id.
use crate::modules::jobs::domain::value_objects::JobState;
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity of a job: the owning user plus the job id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub user_id: i64,
    pub id: Uuid,
}

impl JobKey {
    pub fn new(user_id: i64, id: Uuid) -> Self {
        Self { user_id, id }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.id)
    }
}

/// Settings handed to the input format service that parses the resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputConfiguration {
    pub name: String,
    pub service_identifier: String,
    /// Zone applied to timestamps in the input that carry no offset
    pub time_zone_id: Option<String>,
    #[serde(default)]
    pub service_properties: Map<String, Value>,
}

impl InputConfiguration {
    pub fn new(name: &str, service_identifier: &str) -> Self {
        Self {
            name: name.to_string(),
            service_identifier: service_identifier.to_string(),
            time_zone_id: None,
            service_properties: Map::new(),
        }
    }

    pub fn with_time_zone(mut self, time_zone_id: &str) -> Self {
        self.time_zone_id = Some(time_zone_id.to_string());
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.service_properties.insert(key.to_string(), value);
        self
    }

    /// Parse the configured time zone, if any
    pub fn time_zone(&self) -> AppResult<Option<Tz>> {
        match self.time_zone_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(id) => id
                .parse::<Tz>()
                .map(Some)
                .map_err(|_| AppError::ValidationError(format!("Unknown time zone: {}", id))),
        }
    }
}

/// Declarative configuration of an import.
///
/// Owned values throughout, so the copy stored on a job is never affected by
/// later changes to the caller's instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportConfiguration {
    pub name: String,
    /// Hold the job in `Staged` for preview instead of queueing it
    #[serde(default)]
    pub stage: bool,
    /// `None` or < 1: one transaction; 1: no transaction; > 1: commit every `n` datum
    pub batch_size: Option<i32>,
    pub group_key: Option<String>,
    pub input: InputConfiguration,
}

impl ImportConfiguration {
    pub fn new(name: &str, input: InputConfiguration) -> Self {
        Self {
            name: name.to_string(),
            stage: false,
            batch_size: None,
            group_key: None,
            input,
        }
    }

    pub fn staged(mut self) -> Self {
        self.stage = true;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_group_key(mut self, group_key: &str) -> Self {
        self.group_key = Some(group_key.to_string());
        self
    }
}

/// A request to import a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub configuration: ImportConfiguration,
    /// Stamped onto every imported datum as its posted date
    pub import_date: DateTime<Utc>,
}

impl ImportRequest {
    pub fn new(configuration: ImportConfiguration) -> Self {
        Self {
            configuration,
            import_date: Utc::now(),
        }
    }

    pub fn with_import_date(mut self, import_date: DateTime<Utc>) -> Self {
        self.import_date = import_date;
        self
    }
}

/// Durable job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub user_id: i64,
    pub id: Uuid,
    pub group_key: String,
    pub created: DateTime<Utc>,
    pub import_date: DateTime<Utc>,
    pub state: JobState,
    pub configuration: ImportConfiguration,
    pub resource_content_type: Option<String>,
    /// Fraction of the input processed, 0.0 to 1.0
    pub percent_complete: f64,
    pub loaded_count: u64,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub success: bool,
    pub message: Option<String>,
}

impl JobRecord {
    /// Create a record for a newly submitted request.
    ///
    /// The group key falls back to a fresh random value so ungrouped jobs never
    /// contend with each other.
    pub fn new(user_id: i64, request: &ImportRequest) -> Self {
        let configuration = request.configuration.clone();
        let state = if configuration.stage {
            JobState::Staged
        } else {
            JobState::Queued
        };
        let group_key = configuration
            .group_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            user_id,
            id: Uuid::new_v4(),
            group_key,
            created: Utc::now(),
            import_date: request.import_date,
            state,
            configuration,
            resource_content_type: None,
            percent_complete: 0.0,
            loaded_count: 0,
            started: None,
            completed: None,
            success: false,
            message: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.user_id, self.id)
    }

    pub fn to_status(&self) -> ImportJobStatus {
        ImportJobStatus::from(self)
    }
}

/// Returned to the submitter; carries no live handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub job_id: Uuid,
    pub state: JobState,
    pub group_key: String,
}

/// Immutable snapshot of a job's status, for queries and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJobStatus {
    pub user_id: i64,
    pub job_id: Uuid,
    pub group_key: String,
    pub state: JobState,
    pub configuration: ImportConfiguration,
    pub submit_date: DateTime<Utc>,
    pub import_date: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub percent_complete: f64,
    pub loaded_count: u64,
    pub success: bool,
    pub message: Option<String>,
}

impl ImportJobStatus {
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

impl From<&JobRecord> for ImportJobStatus {
    fn from(record: &JobRecord) -> Self {
        Self {
            user_id: record.user_id,
            job_id: record.id,
            group_key: record.group_key.clone(),
            state: record.state,
            configuration: record.configuration.clone(),
            submit_date: record.created,
            import_date: record.import_date,
            started: record.started,
            completed: record.completed,
            percent_complete: record.percent_complete,
            loaded_count: record.loaded_count,
            success: record.success,
            message: record.message.clone(),
        }
    }
}
