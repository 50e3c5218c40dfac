/// Bulk loading of datum into the storage engine
use super::types::GeneralDatum;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How loaded datum are grouped into transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingTransactionMode {
    /// Everything commits, or nothing does
    SingleTransaction,
    /// Every datum is committed as it is loaded
    NoTransaction,
    /// A commit after every `batch_size` datum
    BatchTransactions,
}

/// Called when the loading context hits an error it cannot recover from
pub type LoadingExceptionHandler = Arc<dyn Fn(&AppError) + Send + Sync>;

#[derive(Clone)]
pub struct LoadingOptions {
    pub name: String,
    pub batch_size: Option<usize>,
    pub transaction_mode: LoadingTransactionMode,
    pub exception_handler: Option<LoadingExceptionHandler>,
}

impl LoadingOptions {
    /// Derive options from a configured batch size:
    /// unset or < 1 is one transaction, 1 is no transaction, > 1 is batched.
    pub fn for_batch_size(name: &str, batch_size: Option<i32>) -> Self {
        let (transaction_mode, batch_size) = match batch_size {
            None => (LoadingTransactionMode::SingleTransaction, None),
            Some(n) if n < 1 => (LoadingTransactionMode::SingleTransaction, None),
            Some(1) => (LoadingTransactionMode::NoTransaction, Some(1)),
            Some(n) => (LoadingTransactionMode::BatchTransactions, Some(n as usize)),
        };
        Self {
            name: name.to_string(),
            batch_size,
            transaction_mode,
            exception_handler: None,
        }
    }

    pub fn with_exception_handler(mut self, handler: LoadingExceptionHandler) -> Self {
        self.exception_handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for LoadingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingOptions")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .field("transaction_mode", &self.transaction_mode)
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

/// A transactional loading session, used by one run from start to finish
#[async_trait]
pub trait LoadingContext: Send {
    async fn load(&mut self, datum: GeneralDatum) -> AppResult<()>;

    /// Commit whatever is outstanding
    async fn commit(&mut self) -> AppResult<()>;

    fn loaded_count(&self) -> u64;

    fn committed_count(&self) -> u64;

    /// Release the session; anything uncommitted is rolled back
    async fn close(&mut self) -> AppResult<()>;
}

#[async_trait]
pub trait BulkLoadingAdapter: Send + Sync {
    async fn open(&self, options: LoadingOptions) -> AppResult<Box<dyn LoadingContext>>;
}
