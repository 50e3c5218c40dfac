pub mod entities;
pub mod events;
pub mod repository;
pub mod value_objects;

pub use entities::{
    ImportConfiguration, ImportJobStatus, ImportRequest, InputConfiguration, JobKey, JobRecord,
    Receipt,
};
pub use events::{JobNotifier, JobStatusEvent};
pub use repository::ImportJobRepository;
pub use value_objects::{JobState, DELETABLE_STATES};
