//! Error handling for hostplan
//!
//! Provides the error taxonomy shared by the registry, the engine, the state
//! store and the plan loader. Library code returns these types; the binary
//! adds context with `anyhow` on top.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for plan declaration, loading and execution
#[derive(Error, Debug)]
pub enum PlanError {
    /// A step names an operation that is not in the command registry
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    /// A plan definition declares a schema version this build cannot read
    #[error("Unsupported plan version '{found}' (supported: {supported})")]
    VersionMismatch { found: String, supported: String },

    /// Resume requested but no persisted run exists
    #[error("No previous run to continue (state file {} not found)", .path.display())]
    NoPreviousRun { path: PathBuf },

    /// Persisted run exists but cannot be decoded
    #[error("Persisted run state at {} is corrupt: {reason}", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    /// A step's operation failed; its outcome has already been persisted
    #[error("Step {} '{description}' failed: {message}", .index + 1)]
    StepExecution {
        index: usize,
        description: String,
        message: String,
        transcript: String,
        level: u8,
    },

    /// Plan definition is malformed (missing file, bad JSON, invalid entry)
    #[error("Plan definition error: {0}")]
    Definition(String),

    /// The target user or its home directory could not be determined
    #[error("Identity error: {0}")]
    Identity(String),

    /// Fetching a remote plan repository failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// IO errors (state file, data bundle, scratch directories)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for hostplan operations
pub type Result<T> = std::result::Result<T, PlanError>;

impl PlanError {
    /// Create an unknown command error
    pub fn unknown_command(name: impl Into<String>) -> Self {
        Self::UnknownCommand { name: name.into() }
    }

    /// Create a definition error
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    /// Create an identity error
    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(msg.into())
    }

    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Returns true if this error is a recorded step failure (as opposed to
    /// a load or declaration error that happened before any step ran)
    pub fn is_step_failure(&self) -> bool {
        matches!(self, Self::StepExecution { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::unknown_command("InstallStuff");
        assert_eq!(err.to_string(), "Unknown command: InstallStuff");

        let err = PlanError::VersionMismatch {
            found: "7".to_string(),
            supported: "1".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported plan version '7' (supported: 1)");
    }

    #[test]
    fn test_step_execution_display_is_one_based() {
        let err = PlanError::StepExecution {
            index: 0,
            description: "Install packages".to_string(),
            message: "exit code 100".to_string(),
            transcript: String::new(),
            level: 1,
        };
        assert_eq!(
            err.to_string(),
            "Step 1 'Install packages' failed: exit code 100"
        );
        assert!(err.is_step_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlanError = io_err.into();
        assert!(matches!(err, PlanError::Io(_)));
        assert!(!err.is_step_failure());
    }

    #[test]
    fn test_no_previous_run_mentions_path() {
        let err = PlanError::NoPreviousRun {
            path: PathBuf::from("/home/ana/.hostplan/state.json"),
        };
        assert!(err.to_string().contains("/home/ana/.hostplan/state.json"));
    }
}
