// Error types for tasklist
//
// Validation errors are returned to the caller and never mutate state.
// Persistence and parse errors are recovered by the store and reported
// through notices.

use thiserror::Error;

/// All error kinds a task store operation can produce
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Task text was empty after trimming
    #[error("Task cannot be empty")]
    EmptyInput,

    /// Another task already has this text (case-insensitive)
    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    /// No task with this id
    #[error("Task not found: {0}")]
    NotFound(u64),

    /// The id counter reached the largest representable id
    #[error("No task ids left")]
    IdsExhausted,

    /// Filter name is not one of all/active/completed
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Import payload is JSON but not a snapshot
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// Key-value backend failed to read or write
    #[error("Storage error: {0}")]
    Persistence(String),

    /// Stored or imported data is not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TaskError {
    /// True for the kinds that are returned synchronously without touching state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TaskError::EmptyInput
                | TaskError::DuplicateTask(_)
                | TaskError::NotFound(_)
                | TaskError::IdsExhausted
                | TaskError::InvalidFilter(_)
        )
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Parse(e.to_string())
    }
}

/// Result type alias for task store operations
pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(TaskError::EmptyInput.to_string(), "Task cannot be empty");
        assert_eq!(
            TaskError::DuplicateTask("Buy milk".to_string()).to_string(),
            "Task already exists: Buy milk"
        );
        assert_eq!(TaskError::NotFound(7).to_string(), "Task not found: 7");
        assert_eq!(
            TaskError::InvalidFilter("done".to_string()).to_string(),
            "Invalid filter: done"
        );
    }

    #[test]
    fn test_is_validation() {
        assert!(TaskError::EmptyInput.is_validation());
        assert!(TaskError::NotFound(1).is_validation());
        assert!(!TaskError::Persistence("quota".to_string()).is_validation());
        assert!(!TaskError::Parse("eof".to_string()).is_validation());
        assert!(!TaskError::InvalidFormat("no tasks".to_string()).is_validation());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let task_err: TaskError = err.into();
        assert!(matches!(task_err, TaskError::Parse(_)));
    }
}
