//! Typed external tool invocations.
//!
//! Leaf operations never assemble `std::process::Command` themselves. They
//! describe the program to run with a type implementing [`ToolArgs`] and hand
//! it to [`crate::tool_runner::run_tool`], which owns spawning, process group
//! isolation and transcript capture.
//!
//! # Contract
//!
//! - `program()`: executable name, resolved through `PATH`.
//! - `to_cli_args()`: arguments exactly as the program expects them.
//! - `get_env_vars()`: extra environment on top of the inherited one.
//! - `stdin()`: optional data written to the child's standard input.
//! - `satisfied_exit_codes()`: nonzero exit codes that mean the desired end
//!   state already holds (`useradd` exits 9 when the user exists). The runner
//!   reports those as success so a re-run after a partial failure is safe.

use std::fmt;

pub trait ToolArgs {
    fn program(&self) -> &str;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn stdin(&self) -> Option<String> {
        None
    }

    fn satisfied_exit_codes(&self) -> &[i32] {
        &[]
    }
}

/// Ad-hoc invocation for tools that need no dedicated argument type.
///
/// ```
/// use hostplan::tool_traits::{Invocation, ToolArgs};
///
/// let inv = Invocation::new("systemctl").arg("enable").arg("ssh");
/// assert_eq!(inv.program(), "systemctl");
/// assert_eq!(inv.to_cli_args(), vec!["enable", "ssh"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    satisfied: Vec<i32>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Treat `code` as "already done" rather than failure
    pub fn satisfied_on(mut self, code: i32) -> Self {
        self.satisfied.push(code);
        self
    }
}

impl ToolArgs for Invocation {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    fn stdin(&self) -> Option<String> {
        self.stdin.clone()
    }

    fn satisfied_exit_codes(&self) -> &[i32] {
        &self.satisfied
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("groupadd")
            .arg("docker")
            .env("LANG", "C")
            .satisfied_on(9);

        assert_eq!(inv.program(), "groupadd");
        assert_eq!(inv.to_cli_args(), vec!["docker"]);
        assert_eq!(inv.get_env_vars(), vec![("LANG".to_string(), "C".to_string())]);
        assert_eq!(inv.satisfied_exit_codes(), &[9]);
        assert!(inv.stdin().is_none());
    }

    #[test]
    fn test_invocation_display() {
        let inv = Invocation::new("tar").args(["xf", "a.tar", "-C", "/opt"]);
        assert_eq!(inv.to_string(), "tar xf a.tar -C /opt");
    }
}
