/// Per-job status sequencer
///
/// Status and progress writes never happen on the task running the bulk load.
/// They are queued here and applied by one worker, in order, one at a time.
use crate::modules::jobs::domain::entities::JobRecord;
use crate::modules::jobs::domain::events::{JobNotifier, JobStatusEvent};
use crate::modules::jobs::domain::repository::ImportJobRepository;
use crate::{log_debug, log_warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What to persist from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Only percent complete and loaded count
    Progress,
    /// The whole record, including state and result
    State,
}

/// Write this immutable snapshot. Applying it twice has the same effect as once.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub kind: UpdateKind,
    pub record: JobRecord,
}

/// Where status updates end up
#[derive(Clone)]
pub struct PublishTarget {
    pub repository: Arc<dyn ImportJobRepository>,
    pub notifier: Option<Arc<dyn JobNotifier>>,
}

impl PublishTarget {
    pub fn new(
        repository: Arc<dyn ImportJobRepository>,
        notifier: Option<Arc<dyn JobNotifier>>,
    ) -> Self {
        Self {
            repository,
            notifier,
        }
    }

    async fn apply(&self, update: StatusUpdate) {
        let key = update.record.key();
        let result = match update.kind {
            UpdateKind::Progress => self
                .repository
                .update_progress(
                    &key,
                    update.record.percent_complete,
                    update.record.loaded_count,
                )
                .await
                .map(|_| ()),
            UpdateKind::State => self.repository.store(&update.record).await.map(|_| ()),
        };

        if let Err(e) = result {
            log_warn!("Failed to save {:?} of import job {}: {}", update.kind, key, e);
        }

        if let Some(notifier) = &self.notifier {
            notifier.job_status_changed(JobStatusEvent::from(&update.record));
        }
    }
}

/// Single-worker queue of status updates for one job
pub struct StatusPublisher {
    sender: mpsc::UnboundedSender<StatusUpdate>,
    worker: JoinHandle<()>,
}

impl StatusPublisher {
    pub fn spawn(target: PublishTarget) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<StatusUpdate>();
        let worker = tokio::spawn(async move {
            while let Some(update) = receiver.recv().await {
                target.apply(update).await;
            }
        });
        Self { sender, worker }
    }

    /// Queue an update; returns false if the publisher has shut down
    pub fn publish(&self, update: StatusUpdate) -> bool {
        self.sender.send(update).is_ok()
    }

    /// Stop accepting updates and wait for queued ones to be applied
    pub async fn shutdown(self) {
        let StatusPublisher { sender, worker } = self;
        drop(sender);
        if let Err(e) = worker.await {
            log_warn!("Status publisher ended abnormally: {}", e);
        } else {
            log_debug!("Status publisher drained");
        }
    }
}
