/// Import job lifecycle
///
/// - Domain: job records, states, events and the repository trait
/// - Infrastructure: in-memory repository
/// - Task: live, process-local view of one job
/// - Registry: cache of live tasks reconciled with the repository
/// - Publisher: per-job sequencer for status writes
/// - Worker: starts queued jobs in the background
pub mod domain;
pub mod infrastructure;
pub mod publisher;
pub mod registry;
pub mod task;
pub mod worker;

// Re-exports for easy access
pub use domain::{
    entities::{
        ImportConfiguration, ImportJobStatus, ImportRequest, InputConfiguration, JobKey,
        JobRecord, Receipt,
    },
    events::{JobNotifier, JobStatusEvent},
    repository::ImportJobRepository,
    value_objects::JobState,
};
pub use infrastructure::InMemoryJobRepository;
pub use publisher::{PublishTarget, StatusPublisher, UpdateKind};
pub use registry::TaskRegistry;
pub use task::{ImportTask, RunHandle};
pub use worker::{QueuedJobWorker, WorkerStatistics};
