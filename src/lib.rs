pub mod modules;
pub mod shared;

use modules::data_import::application::service::{DatumImportService, ImportCollaborators};
use modules::jobs::worker::QueuedJobWorker;
use shared::config::ImportSettings;
use shared::utils::logger::init_logger;
use std::sync::Arc;
use tokio::task::JoinHandle;


pub use modules::data_import::{
    AuthorizationSource, BulkLoadingAdapter, GeneralDatum, ImportResource, InputFormatAdapter,
    InputFormatRegistry, LoadingContext, LoadingOptions, LoadingTransactionMode, PreviewResults,
    ResourceStorage,
};
pub use modules::jobs::{
    ImportConfiguration, ImportJobRepository, ImportJobStatus, ImportRequest, ImportTask,
    InMemoryJobRepository, InputConfiguration, JobNotifier, JobState, JobStatusEvent, Receipt,
};
pub use shared::{AppError, AppResult};

/// A running engine: the service plus its background tasks
pub struct ImportEngine {
    pub service: Arc<DatumImportService>,
    pub worker: Arc<QueuedJobWorker>,
    worker_handle: JoinHandle<()>,
    maintenance_handle: Option<JoinHandle<()>>,
}

impl ImportEngine {
    /// Build the service and start the queued job worker and the task purge.
    /// Must be called from within a tokio runtime.
    pub fn start(settings: ImportSettings, collaborators: ImportCollaborators) -> Self {
        init_logger();

        let service = Arc::new(DatumImportService::new(settings, collaborators));
        let maintenance_handle = service.start_maintenance();

        let worker = Arc::new(QueuedJobWorker::new(service.clone()));
        let worker_handle = {
            let worker = worker.clone();
            tokio::spawn(async move {
                worker.run().await;
            })
        };
        log_info!("Datum import engine started");

        Self {
            service,
            worker,
            worker_handle,
            maintenance_handle,
        }
    }

    /// Like `start`, with settings read from the environment
    pub fn from_env(collaborators: ImportCollaborators) -> AppResult<Self> {
        Ok(Self::start(ImportSettings::from_env()?, collaborators))
    }

    /// Stop background tasks. Runs already in progress finish on their own.
    pub async fn shutdown(self) {
        self.worker.stop();
        if let Some(handle) = self.maintenance_handle {
            handle.abort();
        }
        if let Err(e) = self.worker_handle.await {
            log_warn!("Queued import worker ended abnormally: {}", e);
        }
        log_info!("Datum import engine stopped");
    }
}
