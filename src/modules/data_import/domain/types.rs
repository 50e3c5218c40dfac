use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Callback receiving the fraction (0.0 to 1.0) of work done so far
pub type ProgressListener = Arc<dyn Fn(f64) + Send + Sync>;

/// One datum parsed from an import resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralDatum {
    pub node_id: i64,
    pub source_id: String,
    pub created: DateTime<Utc>,
    /// Set by the engine to the job's import date
    pub posted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub samples: Map<String, Value>,
}

impl GeneralDatum {
    pub fn new(node_id: i64, source_id: &str, created: DateTime<Utc>) -> Self {
        Self {
            node_id,
            source_id: source_id.to_string(),
            created,
            posted: None,
            samples: Map::new(),
        }
    }

    pub fn with_sample(mut self, key: &str, value: Value) -> Self {
        self.samples.insert(key.to_string(), value);
        self
    }
}

/// Raw data handed over by the submitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResource {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl ImportResource {
    pub fn new(name: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            content_type: content_type.to_string(),
            data,
        }
    }
}

/// Local working copy of a submitted resource, as seen by an input format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub path: PathBuf,
    pub content_type: Option<String>,
}

/// A previewed datum with its date and time local to the owning node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewDatum {
    #[serde(flatten)]
    pub datum: GeneralDatum,
    pub time_zone: String,
    pub local_date: NaiveDate,
    pub local_time: NaiveTime,
}

impl PreviewDatum {
    pub fn new(datum: GeneralDatum, time_zone: Tz) -> Self {
        let local = datum.created.with_timezone(&time_zone);
        Self {
            local_date: local.date_naive(),
            local_time: local.time(),
            time_zone: time_zone.name().to_string(),
            datum,
        }
    }
}

/// A bounded page of preview results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResults {
    pub results: Vec<PreviewDatum>,
    /// Estimated number of datum in the whole resource, when known
    pub total_results: Option<u64>,
    pub starting_offset: u64,
    pub returned_result_count: u64,
}
