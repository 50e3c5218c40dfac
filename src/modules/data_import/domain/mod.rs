pub mod authorization;
pub mod input;
pub mod loading;
pub mod services;
pub mod storage;
pub mod types;

// Re-exports for easy access
pub use authorization::AuthorizationSource;
pub use input::{DatumStream, InputFormatAdapter, InputFormatRegistry};
pub use loading::{
    BulkLoadingAdapter, LoadingContext, LoadingExceptionHandler, LoadingOptions,
    LoadingTransactionMode,
};
pub use services::import_components::{
    GroupLocks, ImportExecutor, PreviewEngine, ResourceOrchestrator,
};
pub use storage::{ResourceStorage, StoredResource};
pub use types::{
    GeneralDatum, ImportResource, PreviewDatum, PreviewResults, ProgressListener, ResourceHandle,
};
