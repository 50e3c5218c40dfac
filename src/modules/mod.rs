pub mod data_import;
pub mod jobs;
