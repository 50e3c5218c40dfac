/// Input format services turn a raw resource into a stream of datum
use super::types::{GeneralDatum, ProgressListener, ResourceHandle};
use crate::modules::jobs::domain::entities::InputConfiguration;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily parsed datum. Dropping the stream releases the underlying resource.
pub type DatumStream = BoxStream<'static, AppResult<GeneralDatum>>;

#[async_trait]
pub trait InputFormatAdapter: Send + Sync {
    /// Identifier matched against `InputConfiguration::service_identifier`
    fn service_id(&self) -> &str;

    /// Open the resource for parsing. `progress` may be called at the
    /// adapter's discretion with the fraction of the input consumed.
    async fn open(
        &self,
        config: &InputConfiguration,
        resource: ResourceHandle,
        progress: ProgressListener,
    ) -> AppResult<DatumStream>;
}

/// Input format services keyed by service identifier
#[derive(Default, Clone)]
pub struct InputFormatRegistry {
    adapters: HashMap<String, Arc<dyn InputFormatAdapter>>,
}

impl InputFormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn InputFormatAdapter>) -> Self {
        self.adapters
            .insert(adapter.service_id().to_string(), adapter);
        self
    }

    pub fn get(&self, service_id: &str) -> AppResult<Arc<dyn InputFormatAdapter>> {
        self.adapters.get(service_id).cloned().ok_or_else(|| {
            AppError::ValidationError(format!("Input format service {} not available", service_id))
        })
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.adapters.contains_key(service_id)
    }

    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}
