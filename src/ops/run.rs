//! Generic program execution.

use super::{param, run_single};
use crate::context::ExecutionContext;
use crate::registry::OpResult;
use crate::tool_traits::Invocation;

/// `Run <program> [args...]`: run any program; nonzero exit fails the step
pub fn run(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    let program = param(params, 0, "program")?;
    run_single(&Invocation::new(program).args(params[1..].iter().cloned()))
}
