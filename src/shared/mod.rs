// Shared kernel: errors, configuration, validation and utilities used by every module

pub mod config; // Engine settings loaded from the environment
pub mod errors; // Shared error types
pub mod utils; // Logging and worker pool
pub mod validation; // Configuration validation chain

// Re-exports for convenience
pub use config::ImportSettings;
pub use errors::{AppError, AppResult};
