/// Object storage used to archive submitted resources
use super::types::ProgressListener;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use std::collections::HashSet;

/// A resource read back from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub name: String,
    pub data: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    /// Whether the storage has everything it needs to operate
    fn is_configured(&self) -> bool;

    /// Save a resource, reporting upload progress to `progress`
    async fn save(
        &self,
        name: &str,
        data: Vec<u8>,
        overwrite: bool,
        progress: Option<ProgressListener>,
    ) -> AppResult<bool>;

    /// List resources whose name starts with `prefix`
    async fn list(&self, prefix: &str) -> AppResult<Vec<StoredResource>>;

    /// Delete resources, returning the names actually deleted
    async fn delete(&self, names: &[String]) -> AppResult<HashSet<String>>;
}
