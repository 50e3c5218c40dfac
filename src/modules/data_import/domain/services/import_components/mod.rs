pub mod group_locks;
pub mod import_executor;
pub mod preview_engine;
pub mod resource_orchestrator;

pub use group_locks::GroupLocks;
pub use import_executor::ImportExecutor;
pub use preview_engine::PreviewEngine;
pub use resource_orchestrator::ResourceOrchestrator;
