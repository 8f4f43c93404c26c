//! Command registry
//!
//! Maps every operation name a plan may use to the code that performs it.
//! Names form the closed [`CommandId`] enumeration; a string that does not
//! parse to one is an `UnknownCommand`, as is a valid name with nothing
//! registered under it.
//!
//! The registry is an ordinary value. `main` builds the production table
//! once with [`CommandRegistry::builtin`] and passes it by reference to the
//! engine; tests build their own with fake operations.

use crate::context::ExecutionContext;
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Every operation a plan step can name.
///
/// The string form (plan files, persisted state) is the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter, AsRefStr)]
pub enum CommandId {
    // Files
    CreateDir,
    AppendFile,
    CopyFile,
    InstallUserConfig,
    ChangeOwner,
    ChangePerm,
    Replace,
    Download,

    // Users and groups
    AddUser,
    AddGroup,
    SetPass,
    AssignGroups,
    PrimaryGroup,
    EnableZsh,

    // Archives
    Untar,
    UnzipFile,

    // Packages
    AddRepoKey,
    UpdateRepos,
    UpgradePackages,
    InstallPackages,
    AddArch,
    EnableAptFile,
    EnableFlatpak,
    InstallFlatpaks,
    InstallPip,

    // Services
    ReloadUnits,
    ReloadSysctl,
    EnableService,

    // Git
    CloneRepo,
    CloneAndRun,
    CloneAndRunAsUser,
    InstallZshPlugin,

    // Desktop
    InstallGnomeExt,
    EnableGnomeExt,
    InstallGnomeSettings,

    // Anything else
    Run,
}

impl CommandId {
    /// Parse an operation name as written in a plan definition
    pub fn parse_name(name: &str) -> Result<Self> {
        name.parse().map_err(|_| PlanError::unknown_command(name))
    }

    /// Parameter names, in order, for `hostplan commands`
    pub const fn usage(self) -> &'static str {
        match self {
            Self::CreateDir => "<dir>",
            Self::AppendFile => "<data-file> <target>",
            Self::CopyFile => "<data-file> <target-dir>",
            Self::InstallUserConfig => "<data-file> <home-relative-dir>",
            Self::ChangeOwner => "<owner> <path>",
            Self::ChangePerm => "<mode> <path>",
            Self::Replace => "<sed-expression> <file>",
            Self::Download => "<url> <file>",
            Self::AddUser => "<user>",
            Self::AddGroup => "<group>",
            Self::SetPass => "<user> <password>",
            Self::AssignGroups => "<group[,group...]>",
            Self::PrimaryGroup => "<user> <group>",
            Self::EnableZsh => "",
            Self::Untar => "<archive> <dir>",
            Self::UnzipFile => "<archive> <dir>",
            Self::AddRepoKey => "<url> <keyring-file>",
            Self::UpdateRepos => "",
            Self::UpgradePackages => "",
            Self::InstallPackages => "<\"pkg pkg ...\">",
            Self::AddArch => "<arch>",
            Self::EnableAptFile => "",
            Self::EnableFlatpak => "",
            Self::InstallFlatpaks => "<\"app app ...\">",
            Self::InstallPip => "<\"pkg pkg ...\">",
            Self::ReloadUnits => "",
            Self::ReloadSysctl => "",
            Self::EnableService => "<unit>",
            Self::CloneRepo => "<url> <dir>",
            Self::CloneAndRun => "<url> <\"script args...\">",
            Self::CloneAndRunAsUser => "<url> <\"script args...\">",
            Self::InstallZshPlugin => "<url>",
            Self::InstallGnomeExt => "<extension-uuid> <version>",
            Self::EnableGnomeExt => "<extension-uuid>",
            Self::InstallGnomeSettings => "<data-file>",
            Self::Run => "<program> [args...]",
        }
    }
}

/// Successful operation result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpOutput {
    /// Combined diagnostic output of whatever the operation ran
    pub transcript: String,
}

impl OpOutput {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Classified operation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpFailure {
    pub message: String,
    pub transcript: String,
    /// Nonzero error level persisted with the failed step
    pub level: u8,
}

impl OpFailure {
    /// Ordinary failure at level 1
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transcript: String::new(),
            level: 1,
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }

    /// Override the error level; zero is raised to one
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level.max(1);
        self
    }
}

impl fmt::Display for OpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for OpFailure {
    fn from(err: std::io::Error) -> Self {
        OpFailure::new(err.to_string())
    }
}

impl From<anyhow::Error> for OpFailure {
    fn from(err: anyhow::Error) -> Self {
        OpFailure::new(format!("{:#}", err))
    }
}

pub type OpResult = std::result::Result<OpOutput, OpFailure>;

/// An executable operation.
///
/// Receives the run's execution context and the step's parameters and
/// reports a transcript plus success or a classified failure. Implementations
/// must normalize "desired state already holds" outcomes to success.
pub trait Operation {
    fn execute(&self, ctx: &ExecutionContext, params: &[String]) -> OpResult;
}

impl<F> Operation for F
where
    F: Fn(&ExecutionContext, &[String]) -> OpResult,
{
    fn execute(&self, ctx: &ExecutionContext, params: &[String]) -> OpResult {
        self(ctx, params)
    }
}

/// Table of operation implementations, immutable once handed to the engine
#[derive(Default)]
pub struct CommandRegistry {
    ops: HashMap<CommandId, Box<dyn Operation>>,
}

impl CommandRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the full built-in operation vocabulary
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::ops::register_builtin(&mut registry);
        registry
    }

    /// Insert an operation, replacing any previous one with the same id
    pub fn register(&mut self, id: CommandId, op: impl Operation + 'static) {
        if self.ops.insert(id, Box::new(op)).is_some() {
            tracing::debug!(command = %id, "operation re-registered");
        }
    }

    /// Register a closure; parameter types are inferred from the signature
    pub fn register_fn<F>(&mut self, id: CommandId, f: F)
    where
        F: Fn(&ExecutionContext, &[String]) -> OpResult + 'static,
    {
        self.register(id, f);
    }

    pub fn resolve(&self, id: CommandId) -> Result<&dyn Operation> {
        self.ops
            .get(&id)
            .map(|op| op.as_ref())
            .ok_or_else(|| PlanError::unknown_command(id.as_ref()))
    }

    /// Parse `name` and resolve it in one step
    pub fn resolve_name(&self, name: &str) -> Result<(CommandId, &dyn Operation)> {
        let id = CommandId::parse_name(name)?;
        Ok((id, self.resolve(id)?))
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.ops.contains_key(&id)
    }

    /// Registered ids in declaration order of `CommandId`
    pub fn commands(&self) -> Vec<CommandId> {
        CommandId::iter().filter(|id| self.contains(*id)).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataBundle;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("ana", 1000, 1000, "/home/ana", "Test OS", DataBundle::empty())
    }

    #[test]
    fn test_command_id_round_trip() {
        for id in CommandId::iter() {
            assert_eq!(CommandId::parse_name(&id.to_string()).expect("parse"), id);
        }
    }

    #[test]
    fn test_unknown_name_is_unknown_command() {
        let err = CommandId::parse_name("installPackages").unwrap_err();
        assert!(matches!(err, PlanError::UnknownCommand { ref name } if name == "installPackages"));
    }

    #[test]
    fn test_command_id_serializes_as_name() {
        let json = serde_json::to_string(&CommandId::InstallPackages).expect("serialize");
        assert_eq!(json, "\"InstallPackages\"");
    }

    #[test]
    fn test_resolve_registered_operation() {
        let mut registry = CommandRegistry::new();
        registry.register_fn(CommandId::Run, |_, params| Ok(OpOutput::new(params.join(" "))));

        let (id, op) = registry.resolve_name("Run").expect("resolve");
        assert_eq!(id, CommandId::Run);
        let out = op.execute(&ctx(), &["echo".to_string(), "hi".to_string()]).expect("run");
        assert_eq!(out.transcript, "echo hi");
    }

    #[test]
    fn test_valid_name_without_registration_is_unknown() {
        let registry = CommandRegistry::new();
        assert!(matches!(
            registry.resolve(CommandId::AddUser),
            Err(PlanError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = CommandRegistry::new();
        registry.register_fn(CommandId::Run, |_, _| Ok(OpOutput::new("first")));
        registry.register_fn(CommandId::Run, |_, _| Ok(OpOutput::new("second")));

        assert_eq!(registry.len(), 1);
        let out = registry
            .resolve(CommandId::Run)
            .expect("resolve")
            .execute(&ctx(), &[])
            .expect("run");
        assert_eq!(out.transcript, "second");
    }

    #[test]
    fn test_builtin_registers_every_command() {
        let registry = CommandRegistry::builtin();
        assert_eq!(registry.len(), CommandId::iter().count());
        assert_eq!(registry.commands().len(), registry.len());
    }

    #[test]
    fn test_failure_level_is_never_zero() {
        assert_eq!(OpFailure::new("x").with_level(0).level, 1);
        assert_eq!(OpFailure::new("x").with_level(3).level, 3);
    }
}
