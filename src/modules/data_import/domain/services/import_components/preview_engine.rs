use crate::modules::data_import::domain::authorization::AuthorizationSource;
use crate::modules::data_import::domain::input::InputFormatRegistry;
use crate::modules::data_import::domain::types::{
    PreviewDatum, PreviewResults, ProgressListener, ResourceHandle,
};
use crate::modules::jobs::domain::value_objects::JobState;
use crate::modules::jobs::task::ImportTask;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::TimedOperation;
use crate::shared::utils::worker_pool::WorkerPool;
use crate::log_debug;

use super::resource_orchestrator::ResourceOrchestrator;

use chrono_tz::Tz;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Samples a staged job's input without loading anything
pub struct PreviewEngine {
    input_formats: Arc<InputFormatRegistry>,
    authorization: Arc<dyn AuthorizationSource>,
    resources: Arc<ResourceOrchestrator>,
    max_preview_count: usize,
    pool: Option<WorkerPool>,
}

impl PreviewEngine {
    pub fn new(
        input_formats: Arc<InputFormatRegistry>,
        authorization: Arc<dyn AuthorizationSource>,
        resources: Arc<ResourceOrchestrator>,
        max_preview_count: usize,
        pool: Option<WorkerPool>,
    ) -> Self {
        Self {
            input_formats,
            authorization,
            resources,
            max_preview_count,
            pool,
        }
    }

    pub fn max_preview_count(&self) -> usize {
        self.max_preview_count
    }

    /// Preview up to `requested` datum of a staged job.
    ///
    /// Runs on the preview pool when one is configured, otherwise on the
    /// calling task.
    pub async fn preview(
        self: &Arc<Self>,
        task: Arc<ImportTask>,
        requested: usize,
    ) -> AppResult<PreviewResults> {
        let state = task.state();
        if state != JobState::Staged {
            return Err(AppError::ValidationError(format!(
                "Import job {} must be Staged to preview, but is {}",
                task.key(),
                state
            )));
        }

        match &self.pool {
            Some(pool) => {
                let engine = self.clone();
                pool.spawn(async move { engine.sample(task, requested).await })
                    .await?
            }
            None => self.sample(task, requested).await,
        }
    }

    async fn sample(&self, task: Arc<ImportTask>, requested: usize) -> AppResult<PreviewResults> {
        let record = task.record();
        let key = record.key();
        let timer = TimedOperation::new("datum_preview");
        let limit = requested.min(self.max_preview_count);

        let allowed_node_ids = self
            .authorization
            .authorized_node_ids(record.user_id)
            .await?;
        let adapter = self
            .input_formats
            .get(&record.configuration.input.service_identifier)?;
        let path = self.resources.ensure_local(&key).await?;

        // f64 bits of the last fraction reported by the input format
        let fraction = Arc::new(AtomicU64::new(0f64.to_bits()));
        let progress: ProgressListener = {
            let fraction = fraction.clone();
            Arc::new(move |value: f64| fraction.store(value.to_bits(), Ordering::Relaxed))
        };

        let mut stream = adapter
            .open(
                &record.configuration.input,
                ResourceHandle {
                    path,
                    content_type: record.resource_content_type.clone(),
                },
                progress,
            )
            .await?;

        let mut zones: HashMap<i64, Tz> = HashMap::new();
        let mut results = Vec::with_capacity(limit);
        while results.len() < limit {
            let Some(item) = stream.next().await else {
                break;
            };
            let datum = item?;
            if !allowed_node_ids.contains(&datum.node_id) {
                return Err(AppError::AuthorizationDenied(datum.node_id));
            }
            let zone = match zones.get(&datum.node_id) {
                Some(zone) => *zone,
                None => {
                    let zone = self
                        .authorization
                        .node_time_zone(datum.node_id)
                        .await?
                        .unwrap_or(Tz::UTC);
                    zones.insert(datum.node_id, zone);
                    zone
                }
            };
            results.push(PreviewDatum::new(datum, zone));
        }
        drop(stream);

        let returned = results.len() as u64;
        let fraction = f64::from_bits(fraction.load(Ordering::Relaxed));
        let total_results = estimate_total(returned, fraction);

        timer.finish_with_info(&format!("job {}, {} datum", key, returned));
        log_debug!(
            "Preview of import job {} returned {} of estimated {:?} datum",
            key,
            returned,
            total_results
        );

        Ok(PreviewResults {
            results,
            total_results,
            starting_offset: 0,
            returned_result_count: returned,
        })
    }
}

/// Extrapolate the full result count from a sample and the fraction of the
/// input consumed to produce it
fn estimate_total(collected: u64, fraction: f64) -> Option<u64> {
    if fraction.is_finite() && fraction > 0.0 {
        Some((collected as f64 / fraction.min(1.0)).round() as u64)
    } else {
        None
    }
}
