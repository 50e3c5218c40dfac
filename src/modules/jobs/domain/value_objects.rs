/// Value objects for jobs domain
use serde::{Deserialize, Serialize};

/// Lifecycle state of an import job.
///
/// States only move forward: `Staged -> Queued -> Claimed -> Executing -> Completed`.
/// `Staged` jobs wait for an explicit promotion to `Queued` and may be previewed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum JobState {
    #[default]
    Unknown,
    Staged,
    Queued,
    Claimed,
    Executing,
    Completed,
}

/// States from which a job may be deleted
pub const DELETABLE_STATES: [JobState; 4] = [
    JobState::Unknown,
    JobState::Staged,
    JobState::Queued,
    JobState::Completed,
];

impl JobState {
    pub fn is_deletable(&self) -> bool {
        DELETABLE_STATES.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed)
    }

    /// Whether a job in this state may move to `next`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Unknown, Staged)
                | (Unknown, Queued)
                | (Staged, Queued)
                | (Queued, Claimed)
                | (Queued, Executing)
                | (Claimed, Executing)
                | (Executing, Completed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Unknown => write!(f, "Unknown"),
            JobState::Staged => write!(f, "Staged"),
            JobState::Queued => write!(f, "Queued"),
            JobState::Claimed => write!(f, "Claimed"),
            JobState::Executing => write!(f, "Executing"),
            JobState::Completed => write!(f, "Completed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" | "u" => Ok(JobState::Unknown),
            "staged" | "s" => Ok(JobState::Staged),
            "queued" | "q" => Ok(JobState::Queued),
            "claimed" | "p" => Ok(JobState::Claimed),
            "executing" | "e" => Ok(JobState::Executing),
            "completed" | "c" => Ok(JobState::Completed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}
