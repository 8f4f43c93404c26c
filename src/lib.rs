//! hostplan library
//!
//! Declarative, resumable host provisioning: a plan of named operations is
//! executed step by step, with the run state persisted after every change so
//! an interrupted or failed run continues where it stopped.

pub mod cli;
pub mod context;
pub mod engine;
pub mod error;
pub mod loader;
pub mod ops;
pub mod plan;
pub mod process_guard;
pub mod registry;
pub mod state_store;
pub mod tool_runner;
pub mod tool_traits;

// Re-export main types for convenience
pub use context::{DataBundle, ExecutionContext, Identity};
pub use engine::{ConsoleReporter, Engine, ProgressReporter, RunSummary, SilentReporter};
pub use error::{PlanError, Result};
pub use loader::{declare_plan, validate_definition, PlanDefinition, PlanSource, StepDefinition};
pub use plan::{Plan, Step, StepCounts, StepStatus};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use registry::{CommandId, CommandRegistry, OpFailure, OpOutput, OpResult, Operation};
pub use state_store::StateStore;
pub use tool_runner::{run_tool, ToolOutput};
pub use tool_traits::{Invocation, ToolArgs};
