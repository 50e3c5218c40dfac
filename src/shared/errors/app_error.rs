use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    #[error("Unknown import job: {0}")]
    UnknownJob(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Input format error: {message}")]
    InputFormat {
        message: String,
        line_number: Option<u64>,
        line: Option<String>,
    },

    #[error("Not authorized to load data for node {0}.")]
    AuthorizationDenied(i64),

    #[error("Storage timeout: {0}")]
    StorageTimeout(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Build an input format error carrying the offending line, when known.
    pub fn input_format(
        message: impl Into<String>,
        line_number: Option<u64>,
        line: Option<String>,
    ) -> Self {
        AppError::InputFormat {
            message: message.into(),
            line_number,
            line,
        }
    }

    /// Message recorded on a job whose run ended with this error.
    pub fn terminal_message(&self) -> String {
        match self {
            AppError::AuthorizationDenied(node_id) => {
                format!("Not authorized to load data for node {}.", node_id)
            }
            AppError::InputFormat {
                message,
                line_number,
                line,
            } => match (line_number, line) {
                (Some(n), Some(l)) => format!("{} (line {}): {}", message, n, l),
                (Some(n), None) => format!("{} (line {})", message, n),
                (None, Some(l)) => format!("{}: {}", message, l),
                (None, None) => message.clone(),
            },
            AppError::ValidationError(msg)
            | AppError::StorageTimeout(msg)
            | AppError::StorageError(msg)
            | AppError::DatabaseError(msg)
            | AppError::Timeout(msg)
            | AppError::IoError(msg)
            | AppError::InternalError(msg) => msg.clone(),
            AppError::UnknownJob(id) => format!("Unknown import job {}.", id),
            AppError::Cancelled => "Import cancelled.".to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("Invalid JSON: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::ValidationError(format!("Invalid UUID: {}", err))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(err: std::num::ParseIntError) -> Self {
        AppError::ValidationError(format!("Invalid number: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            AppError::Cancelled
        } else {
            AppError::InternalError(format!("Worker task failed: {}", err))
        }
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_denied_message() {
        let err = AppError::AuthorizationDenied(123);
        assert_eq!(err.to_string(), "Not authorized to load data for node 123.");
        assert_eq!(
            err.terminal_message(),
            "Not authorized to load data for node 123."
        );
    }

    #[test]
    fn test_input_format_message_includes_line() {
        let err = AppError::input_format(
            "Invalid timestamp",
            Some(4),
            Some("1,foo,bar".to_string()),
        );
        assert_eq!(err.terminal_message(), "Invalid timestamp (line 4): 1,foo,bar");

        let err = AppError::input_format("Missing column", None, None);
        assert_eq!(err.terminal_message(), "Missing column");
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let json = serde_json::to_value(AppError::ValidationError("bad".into())).unwrap();
        assert_eq!(json["type"], "ValidationError");
        assert_eq!(json["message"], "bad");
    }
}
