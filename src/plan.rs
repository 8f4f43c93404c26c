//! Plan and step data model
//!
//! A [`Plan`] is an ordered list of [`Step`]s plus metadata. Declaration
//! order is the only scheduling input: there is no dependency graph and no
//! priority. The whole structure serializes to the persisted run state.
//!
//! # Step lifecycle
//!
//! ```text
//! Pending ──run──▶ Completed          (never executed again)
//!    │
//!    └──run──▶ Failed{message,level} ──next invocation──▶ Completed | Failed
//! ```
//!
//! A step's command, parameters and description are fixed at declaration;
//! only its status changes, and only through the engine.

use crate::registry::CommandId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Execution status of a single step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed {
        message: String,
        /// Nonzero error level
        level: u8,
    },
}

impl StepStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Error message of a failed step
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Error level of a failed step, 0 otherwise
    pub fn error_level(&self) -> u8 {
        match self {
            Self::Failed { level, .. } => *level,
            _ => 0,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed { message, level } => write!(f, "failed (level {}): {}", level, message),
        }
    }
}

/// One declared operation instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    description: String,
    command: CommandId,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    status: StepStatus,
}

impl Step {
    pub(crate) fn new(description: String, command: CommandId, params: Vec<String>) -> Self {
        Self {
            description,
            command,
            params,
            status: StepStatus::Pending,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn status(&self) -> &StepStatus {
        &self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = StepStatus::Completed;
    }

    pub(crate) fn mark_failed(&mut self, message: String, level: u8) {
        self.status = StepStatus::Failed {
            message,
            level: level.max(1),
        };
    }
}

/// Per-status step counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Ordered, named collection of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    name: String,
    #[serde(default)]
    description: String,
    version: String,
    /// Directory of the plan's auxiliary data files, reopened on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    steps: Vec<Step>,
}

impl Plan {
    /// Create an empty plan
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            data_dir: None,
            steps: Vec::new(),
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True when every step has completed
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(Step::is_completed)
    }

    /// Index of the first step a run would execute
    pub fn first_incomplete(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_completed())
    }

    pub fn counts(&self) -> StepCounts {
        self.steps
            .iter()
            .fold(StepCounts::default(), |mut acc, step| {
                match step.status() {
                    StepStatus::Pending => acc.pending += 1,
                    StepStatus::Completed => acc.completed += 1,
                    StepStatus::Failed { .. } => acc.failed += 1,
                }
                acc
            })
    }

    pub(crate) fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub(crate) fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }
}
