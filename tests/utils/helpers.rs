/// Test helper functions and engine builders
use super::fakes::{
    CsvFormat, MemoryStorage, PausingRepository, RecordingLoader, RecordingNotifier,
    StaticAuthorization, CSV_SERVICE,
};
use datum_import::modules::data_import::{DatumImportService, ImportCollaborators};
use datum_import::modules::jobs::{
    ImportConfiguration, ImportJobStatus, ImportRequest, InMemoryJobRepository, InputConfiguration,
};
use datum_import::shared::config::ImportSettings;
use datum_import::{ImportResource, InputFormatRegistry, ResourceStorage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const USER_ID: i64 = 42;
pub const NODE_ID: i64 = 123;
pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestEngine {
    pub service: Arc<DatumImportService>,
    pub repository: Arc<PausingRepository>,
    pub loader: Arc<RecordingLoader>,
    pub storage: Option<Arc<MemoryStorage>>,
    pub notifier: Arc<RecordingNotifier>,
    pub work_dir: PathBuf,
}

impl TestEngine {
    pub fn local_path(&self, job_id: Uuid) -> PathBuf {
        self.work_dir.join(format!("{}-{}", USER_ID, job_id))
    }

    /// Perform a job and wait for it to complete
    pub async fn perform_and_wait(&self, job_id: Uuid) -> ImportJobStatus {
        let task = self.service.perform_import(USER_ID, job_id).await.unwrap();
        task.wait(Some(WAIT)).await.unwrap()
    }
}

pub struct TestEngineBuilder {
    settings: ImportSettings,
    loader: RecordingLoader,
    authorization: StaticAuthorization,
    storage: Option<MemoryStorage>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        let settings = ImportSettings {
            work_dir: std::env::temp_dir().join(format!("datum-import-test-{}", Uuid::new_v4())),
            max_concurrent_imports: 2,
            resource_storage_wait_ms: 5_000,
            progress_log_count: 2,
            queue_poll_interval_ms: 20,
            ..ImportSettings::default()
        };
        Self {
            settings,
            loader: RecordingLoader::new(),
            authorization: StaticAuthorization::nodes(&[NODE_ID]),
            storage: None,
        }
    }

    pub fn loader(mut self, loader: RecordingLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn authorization(mut self, authorization: StaticAuthorization) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_storage(self) -> Self {
        self.storage(MemoryStorage::default())
    }

    pub fn storage(mut self, storage: MemoryStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn settings(mut self, update: impl FnOnce(&mut ImportSettings)) -> Self {
        update(&mut self.settings);
        self
    }

    pub fn build(self) -> TestEngine {
        let repository = Arc::new(PausingRepository::default());
        let loader = Arc::new(self.loader);
        let notifier = Arc::new(RecordingNotifier::default());
        let storage = self.storage.map(Arc::new);
        let work_dir = self.settings.work_dir.clone();

        let collaborators = ImportCollaborators {
            repository: repository.clone(),
            input_formats: InputFormatRegistry::new().register(Arc::new(CsvFormat)),
            loader: loader.clone(),
            authorization: Arc::new(self.authorization),
            resource_storage: storage
                .clone()
                .map(|s| s as Arc<dyn ResourceStorage>),
            notifier: Some(notifier.clone()),
        };

        TestEngine {
            service: Arc::new(DatumImportService::new(self.settings, collaborators)),
            repository,
            loader,
            storage,
            notifier,
            work_dir,
        }
    }
}

pub fn build_test_engine() -> TestEngine {
    TestEngineBuilder::new().build()
}

pub fn configuration(name: &str) -> ImportConfiguration {
    ImportConfiguration::new(name, InputConfiguration::new("CSV", CSV_SERVICE))
}

pub fn request(configuration: ImportConfiguration) -> ImportRequest {
    ImportRequest::new(configuration)
}

pub fn resource(data: Vec<u8>) -> ImportResource {
    ImportResource::new("readings.csv", "text/csv", data)
}

/// Settings and collaborators for building an engine by hand
pub fn engine_parts() -> (ImportSettings, ImportCollaborators) {
    let builder = TestEngineBuilder::new();
    let collaborators = ImportCollaborators {
        repository: Arc::new(InMemoryJobRepository::new()),
        input_formats: InputFormatRegistry::new().register(Arc::new(CsvFormat)),
        loader: Arc::new(RecordingLoader::new()),
        authorization: Arc::new(StaticAuthorization::nodes(&[NODE_ID])),
        resource_storage: None,
        notifier: None,
    };
    (builder.settings, collaborators)
}
