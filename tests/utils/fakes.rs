/// In-process fakes for the engine's collaborators
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use datum_import::modules::data_import::domain::{
    AuthorizationSource, BulkLoadingAdapter, DatumStream, GeneralDatum, InputFormatAdapter,
    LoadingContext, LoadingOptions, LoadingTransactionMode, ProgressListener, ResourceHandle,
    ResourceStorage, StoredResource,
};
use datum_import::modules::jobs::{
    ImportConfiguration, ImportJobRepository, InMemoryJobRepository, InputConfiguration, JobKey,
    JobNotifier, JobRecord, JobState, JobStatusEvent,
};
use datum_import::{AppError, AppResult};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub const CSV_SERVICE: &str = "csv";

/// Build a resource body of `node_id,source_id,created,watts` lines
pub fn csv_rows(rows: &[(i64, &str)]) -> Vec<u8> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    rows.iter()
        .enumerate()
        .map(|(i, (node_id, source_id))| {
            let created = start + ChronoDuration::minutes(i as i64);
            format!("{},{},{},{}\n", node_id, source_id, created.to_rfc3339(), i * 10)
        })
        .collect::<String>()
        .into_bytes()
}

/// `count` rows, all for one node
pub fn csv_for_node(node_id: i64, count: usize) -> Vec<u8> {
    let rows: Vec<(i64, &str)> = (0..count).map(|_| (node_id, "meter/1")).collect();
    csv_rows(&rows)
}

/// Parses the `csv_rows` format, reporting linear progress as rows are read
pub struct CsvFormat;

fn parse_line(line_number: u64, line: &str) -> AppResult<GeneralDatum> {
    let bad =
        |message: &str| AppError::input_format(message, Some(line_number), Some(line.to_string()));
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 4 {
        return Err(bad("Expected 4 columns"));
    }
    let node_id: i64 = fields[0].parse().map_err(|_| bad("Invalid node ID"))?;
    let created: DateTime<Utc> = DateTime::parse_from_rfc3339(fields[2])
        .map_err(|_| bad("Invalid date"))?
        .with_timezone(&Utc);
    let watts: i64 = fields[3].parse().map_err(|_| bad("Invalid watts"))?;
    Ok(GeneralDatum::new(node_id, fields[1], created).with_sample("watts", json!(watts)))
}

#[async_trait]
impl InputFormatAdapter for CsvFormat {
    fn service_id(&self) -> &str {
        CSV_SERVICE
    }

    async fn open(
        &self,
        _config: &InputConfiguration,
        resource: ResourceHandle,
        progress: ProgressListener,
    ) -> AppResult<DatumStream> {
        let text = tokio::fs::read_to_string(&resource.path).await?;
        let lines: Vec<String> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        let total = lines.len().max(1) as f64;

        let stream = stream::iter(lines.into_iter().enumerate()).map(move |(i, line)| {
            let parsed = parse_line(i as u64 + 1, &line);
            progress((i + 1) as f64 / total);
            parsed
        });
        Ok(stream.boxed())
    }
}

#[derive(Debug, Default)]
pub struct LoaderState {
    pub options: Vec<LoadingOptions>,
    pub loaded: Vec<GeneralDatum>,
    pub committed_count: u64,
    pub commits: u64,
    pub closed: u64,
}

/// Loading adapter keeping everything in memory, committing the way the
/// transaction mode asks
#[derive(Default)]
pub struct RecordingLoader {
    pub state: Arc<Mutex<LoaderState>>,
    /// Fail the load of the n-th datum (1-based)
    pub fail_at: Option<u64>,
    /// Pause before each load
    pub load_delay: Option<Duration>,
}

impl RecordingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(n: u64) -> Self {
        Self {
            fail_at: Some(n),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            load_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn last_options(&self) -> Option<LoadingOptions> {
        self.state.lock().unwrap().options.last().cloned()
    }

    pub fn loaded(&self) -> Vec<GeneralDatum> {
        self.state.lock().unwrap().loaded.clone()
    }

    pub fn committed_count(&self) -> u64 {
        self.state.lock().unwrap().committed_count
    }

    pub fn closed(&self) -> u64 {
        self.state.lock().unwrap().closed
    }
}

struct RecordingContext {
    options: LoadingOptions,
    state: Arc<Mutex<LoaderState>>,
    fail_at: Option<u64>,
    load_delay: Option<Duration>,
    loaded: u64,
    committed: u64,
}

#[async_trait]
impl BulkLoadingAdapter for RecordingLoader {
    async fn open(&self, options: LoadingOptions) -> AppResult<Box<dyn LoadingContext>> {
        self.state.lock().unwrap().options.push(options.clone());
        Ok(Box::new(RecordingContext {
            options,
            state: self.state.clone(),
            fail_at: self.fail_at,
            load_delay: self.load_delay,
            loaded: 0,
            committed: 0,
        }))
    }
}

#[async_trait]
impl LoadingContext for RecordingContext {
    async fn load(&mut self, datum: GeneralDatum) -> AppResult<()> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(self.loaded + 1) {
            let error = AppError::DatabaseError("Duplicate datum".to_string());
            if let Some(handler) = &self.options.exception_handler {
                handler(&error);
            }
            return Err(error);
        }

        self.state.lock().unwrap().loaded.push(datum);
        self.loaded += 1;

        let commit_now = match self.options.transaction_mode {
            LoadingTransactionMode::NoTransaction => true,
            LoadingTransactionMode::BatchTransactions => self
                .options
                .batch_size
                .map_or(false, |size| self.loaded % size as u64 == 0),
            LoadingTransactionMode::SingleTransaction => false,
        };
        if commit_now {
            self.commit().await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        self.committed = self.loaded;
        let mut state = self.state.lock().unwrap();
        state.committed_count = self.committed;
        state.commits += 1;
        Ok(())
    }

    fn loaded_count(&self) -> u64 {
        self.loaded
    }

    fn committed_count(&self) -> u64 {
        self.committed
    }

    async fn close(&mut self) -> AppResult<()> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

pub struct StaticAuthorization {
    pub nodes: HashSet<i64>,
    pub zones: HashMap<i64, Tz>,
}

impl StaticAuthorization {
    pub fn nodes(nodes: &[i64]) -> Self {
        Self {
            nodes: nodes.iter().copied().collect(),
            zones: HashMap::new(),
        }
    }

    pub fn with_zone(mut self, node_id: i64, zone: Tz) -> Self {
        self.zones.insert(node_id, zone);
        self
    }
}

#[async_trait]
impl AuthorizationSource for StaticAuthorization {
    async fn authorized_node_ids(&self, _user_id: i64) -> AppResult<HashSet<i64>> {
        Ok(self.nodes.clone())
    }

    async fn node_time_zone(&self, node_id: i64) -> AppResult<Option<Tz>> {
        Ok(self.zones.get(&node_id).copied())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    pub resources: Mutex<HashMap<String, Vec<u8>>>,
    /// Pause before every save
    pub save_delay: Option<Duration>,
    /// Answer saves with this instead of storing anything
    pub save_outcome: Option<AppResult<bool>>,
}

impl MemoryStorage {
    pub fn slow(delay: Duration) -> Self {
        Self {
            save_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn answering(outcome: AppResult<bool>) -> Self {
        Self {
            save_outcome: Some(outcome),
            ..Self::default()
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ResourceStorage for MemoryStorage {
    fn is_configured(&self) -> bool {
        true
    }

    async fn save(
        &self,
        name: &str,
        data: Vec<u8>,
        _overwrite: bool,
        progress: Option<ProgressListener>,
    ) -> AppResult<bool> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(outcome) = &self.save_outcome {
            return outcome.clone();
        }
        self.resources
            .lock()
            .unwrap()
            .insert(name.to_string(), data);
        if let Some(progress) = progress {
            progress(1.0);
        }
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<StoredResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, data)| StoredResource {
                name: name.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn delete(&self, names: &[String]) -> AppResult<HashSet<String>> {
        let mut resources = self.resources.lock().unwrap();
        Ok(names
            .iter()
            .filter(|name| resources.remove(name.as_str()).is_some())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<JobStatusEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<JobStatusEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl JobNotifier for RecordingNotifier {
    fn job_status_changed(&self, event: JobStatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct PendingPause {
    operation: &'static str,
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// A paused repository operation
pub struct Pause {
    reached: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Pause {
    /// Wait until the operation is called; sending on the result lets it
    /// continue
    pub async fn reached(self) -> oneshot::Sender<()> {
        self.reached.await.unwrap();
        self.release
    }
}

/// In-memory job repository that can hold the next call of one operation
/// until released, so another caller can act in between
#[derive(Default)]
pub struct PausingRepository {
    inner: InMemoryJobRepository,
    pause: Mutex<Option<PendingPause>>,
}

impl PausingRepository {
    /// Hold the next call of `operation` ("update_state" or
    /// "update_configuration")
    pub fn pause_before(&self, operation: &'static str) -> Pause {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.pause.lock().unwrap() = Some(PendingPause {
            operation,
            reached: reached_tx,
            release: release_rx,
        });
        Pause {
            reached: reached_rx,
            release: release_tx,
        }
    }

    async fn checkpoint(&self, operation: &str) {
        let pending = {
            let mut slot = self.pause.lock().unwrap();
            match slot.as_ref() {
                Some(pause) if pause.operation == operation => slot.take(),
                _ => None,
            }
        };
        if let Some(pause) = pending {
            let _ = pause.reached.send(());
            let _ = pause.release.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }
}

#[async_trait]
impl ImportJobRepository for PausingRepository {
    async fn store(&self, record: &JobRecord) -> AppResult<JobKey> {
        self.inner.store(record).await
    }

    async fn get(&self, key: &JobKey) -> AppResult<Option<JobRecord>> {
        self.inner.get(key).await
    }

    async fn find_for_owner(
        &self,
        user_id: i64,
        states: Option<&[JobState]>,
    ) -> AppResult<Vec<JobRecord>> {
        self.inner.find_for_owner(user_id, states).await
    }

    async fn delete_for_owner(
        &self,
        user_id: i64,
        ids: Option<&[Uuid]>,
        allowed_states: &[JobState],
    ) -> AppResult<usize> {
        self.inner.delete_for_owner(user_id, ids, allowed_states).await
    }

    async fn claim_queued(&self) -> AppResult<Option<JobRecord>> {
        self.inner.claim_queued().await
    }

    async fn update_state(
        &self,
        key: &JobKey,
        desired: JobState,
        expected: &[JobState],
    ) -> AppResult<bool> {
        self.checkpoint("update_state").await;
        self.inner.update_state(key, desired, expected).await
    }

    async fn update_configuration(
        &self,
        key: &JobKey,
        configuration: &ImportConfiguration,
        group_key: &str,
        expected: &[JobState],
    ) -> AppResult<bool> {
        self.checkpoint("update_configuration").await;
        self.inner
            .update_configuration(key, configuration, group_key, expected)
            .await
    }

    async fn update_progress(
        &self,
        key: &JobKey,
        percent_complete: f64,
        loaded_count: u64,
    ) -> AppResult<bool> {
        self.inner
            .update_progress(key, percent_complete, loaded_count)
            .await
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        self.inner.purge_completed_before(cutoff).await
    }
}
