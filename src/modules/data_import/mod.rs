pub mod application;
pub mod domain;

// Re-exports for easy external access
pub use application::service::{DatumImportService, ImportCollaborators};
pub use domain::{
    AuthorizationSource, BulkLoadingAdapter, GeneralDatum, ImportResource, InputFormatAdapter,
    InputFormatRegistry, LoadingContext, LoadingOptions, LoadingTransactionMode, PreviewResults,
    ResourceStorage,
};
