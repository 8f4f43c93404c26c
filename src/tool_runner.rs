//! External tool execution
//!
//! [`run_tool`] is the only sanctioned way for leaf operations to start an
//! external program. It guarantees:
//!
//! - process group isolation and PID registration (see `process_guard`)
//! - stdin delivery for tools that read secrets or settings from it
//! - a captured transcript of stdout and stderr
//! - exit-code normalization through `ToolArgs::satisfied_exit_codes`
//!
//! The call blocks until the tool exits.

use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::tool_traits::ToolArgs;
use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Execute a tool and wait for it.
///
/// # Returns
///
/// - `Ok(output)` once the tool has exited, whatever its exit code;
///   `output.success` tells whether the run counts as successful
/// - `Err` if the tool could not be spawned or waited on
pub fn run_tool<T: ToolArgs + ?Sized>(args: &T) -> Result<ToolOutput> {
    let program = args.program().to_string();
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();
    let stdin_data = args.stdin();

    tracing::debug!(
        program = %program,
        args = ?cli_args,
        env = ?env_vars.iter().map(|(k, _)| k).collect::<Vec<_>>(),
        "run_tool"
    );

    let mut cmd = Command::new(&program);
    cmd.args(&cli_args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    for (key, value) in &env_vars {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    let pid = child.id();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            // A tool that exits without reading stdin closes the pipe; its
            // exit status reports the real problem.
            if let Err(e) = stdin.write_all(data.as_bytes()) {
                tracing::debug!(program = %program, error = %e, "stdin write failed");
            }
        }
    }

    let output = child.wait_with_output();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }

    let output = output.with_context(|| format!("Failed waiting for {}", program))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();

    let already_satisfied = !output.status.success()
        && exit_code.is_some_and(|code| args.satisfied_exit_codes().contains(&code));

    if output.status.success() {
        tracing::debug!(program = %program, "tool exited successfully");
    } else if already_satisfied {
        tracing::debug!(
            program = %program,
            code = exit_code.unwrap_or(-1),
            "tool reports desired state already present"
        );
    } else {
        tracing::debug!(program = %program, code = ?exit_code, "tool failed");
    }

    Ok(ToolOutput {
        program,
        stdout,
        stderr,
        exit_code,
        success: output.status.success() || already_satisfied,
        already_satisfied,
    })
}

/// Output from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Program that was run
    pub program: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Exit code 0, or a code the tool declared as "already satisfied"
    pub success: bool,
    /// The tool failed only because the desired state already held
    pub already_satisfied: bool,
}

impl ToolOutput {
    /// Combined stdout and stderr, in that order
    pub fn transcript(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// One-line description of a failed run
    pub fn failure_message(&self) -> String {
        match self.exit_code {
            Some(code) => format!("{} exited with status {}", self.program, code),
            None => format!("{} was terminated by a signal", self.program),
        }
    }
}
