//! Plan definitions and the places they come from.
//!
//! A plan directory holds a `plan.json` definition plus any data files its
//! steps reference by name. The directory can be local, the bundled
//! defaults, or a git repository cloned on demand.
//!
//! # Definition format
//!
//! ```json
//! {
//!   "name": "workstation",
//!   "description": "Debian desktop for development",
//!   "version": "1",
//!   "steps": [
//!     { "description": "Install base tools", "command": "InstallPackages", "params": ["git curl"] }
//!   ]
//! }
//! ```
//!
//! Unknown fields are rejected. `version` must equal
//! [`SUPPORTED_SCHEMA_VERSION`].

use crate::engine::Engine;
use crate::error::{PlanError, Result};
use crate::ops::vcs::GitCloneArgs;
use crate::plan::Plan;
use crate::registry::{CommandId, CommandRegistry};
use crate::tool_runner::run_tool;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Definition file name inside a plan directory
pub const DEFINITION_FILE: &str = "plan.json";

/// Schema version this build reads
pub const SUPPORTED_SCHEMA_VERSION: &str = "1";

/// Subdirectory of the work dir the bundled defaults are extracted to
const DEFAULTS_DIR: &str = "defaults";

/// Subdirectory of the work dir a plan repository is cloned to
const REPO_DIR: &str = "repo";

/// Bundled default plan: definition plus data files
const DEFAULT_FILES: &[(&str, &str)] = &[
    (DEFINITION_FILE, include_str!("../defaults/plan.json")),
    ("bashrc.append", include_str!("../defaults/bashrc.append")),
    ("sysctl.append", include_str!("../defaults/sysctl.append")),
    ("gnome.dconf", include_str!("../defaults/gnome.dconf")),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl PlanDefinition {
    /// Parse a definition document
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| PlanError::definition(format!("invalid {}: {}", DEFINITION_FILE, e)))
    }

    /// Read `plan.json` from a plan directory
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(DEFINITION_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            PlanError::definition(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Check the schema version, then every step against `registry`.
    ///
    /// Nothing is declared or persisted; a definition that fails here never
    /// produces a partial plan.
    pub fn validate(&self, registry: &CommandRegistry) -> Result<()> {
        if self.version.trim() != SUPPORTED_SCHEMA_VERSION {
            return Err(PlanError::VersionMismatch {
                found: self.version.clone(),
                supported: SUPPORTED_SCHEMA_VERSION.to_string(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(PlanError::definition("plan name must not be empty"));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.description.trim().is_empty() {
                return Err(PlanError::definition(format!(
                    "step {} ({}) has no description",
                    index + 1,
                    step.command
                )));
            }
            registry.resolve_name(&step.command)?;
        }
        Ok(())
    }

    /// Commands used by this definition, in first-use order
    pub fn commands(&self) -> Vec<CommandId> {
        let mut seen = Vec::new();
        for id in self
            .steps
            .iter()
            .filter_map(|s| CommandId::parse_name(&s.command).ok())
        {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }
}

/// Load and check a plan directory without running anything
pub fn validate_definition(dir: &Path, registry: &CommandRegistry) -> Result<PlanDefinition> {
    let definition = PlanDefinition::load_from_dir(dir)?;
    definition.validate(registry)?;
    Ok(definition)
}

/// Declare every step of `definition` as a fresh plan.
///
/// The whole definition is validated first, so an unknown command anywhere
/// leaves the previous snapshot in place.
pub fn declare_plan(engine: &mut Engine<'_>, definition: &PlanDefinition, data_dir: &Path) -> Result<Plan> {
    definition.validate(engine.registry())?;

    let mut plan = engine.begin(
        &definition.name,
        &definition.description,
        &definition.version,
        Some(data_dir),
    )?;
    for step in &definition.steps {
        engine.declare(&mut plan, &step.description, &step.command, step.params.clone())?;
    }

    tracing::info!(
        plan = plan.name(),
        steps = plan.len(),
        data = %data_dir.display(),
        "plan declared"
    );
    Ok(plan)
}

/// Where a plan directory comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    /// Local plan directory
    Directory(PathBuf),
    /// Definition and data files compiled into the binary
    Defaults,
    /// Git repository whose checkout is a plan directory
    Repository(String),
}

impl PlanSource {
    /// Materialize the plan directory.
    ///
    /// Defaults and repositories are placed under `work_dir`, next to the
    /// run state, so a resume after a reboot still finds the data files.
    pub fn prepare(&self, work_dir: &Path) -> Result<PathBuf> {
        match self {
            Self::Directory(dir) => {
                let dir = fs::canonicalize(dir).map_err(|e| {
                    PlanError::definition(format!("plan directory {}: {}", dir.display(), e))
                })?;
                if !dir.is_dir() {
                    return Err(PlanError::definition(format!(
                        "{} is not a directory",
                        dir.display()
                    )));
                }
                Ok(dir)
            }
            Self::Defaults => {
                let dir = work_dir.join(DEFAULTS_DIR);
                extract_defaults(&dir)?;
                Ok(dir)
            }
            Self::Repository(url) => {
                let dir = work_dir.join(REPO_DIR);
                fetch_repository(url, &dir)?;
                Ok(dir)
            }
        }
    }
}

impl std::fmt::Display for PlanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory(dir) => write!(f, "directory {}", dir.display()),
            Self::Defaults => write!(f, "bundled defaults"),
            Self::Repository(url) => write!(f, "repository {}", url),
        }
    }
}

/// Write the bundled default files into a clean `dir`
fn extract_defaults(dir: &Path) -> Result<()> {
    remove_dir_if_present(dir)?;
    fs::create_dir_all(dir)?;
    for (name, content) in DEFAULT_FILES {
        fs::write(dir.join(name), content)?;
    }
    tracing::debug!(dir = %dir.display(), files = DEFAULT_FILES.len(), "defaults extracted");
    Ok(())
}

/// Replace `dir` with a fresh shallow clone of `url`
fn fetch_repository(url: &str, dir: &Path) -> Result<()> {
    remove_dir_if_present(dir)?;
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::info!(url, dir = %dir.display(), "cloning plan repository");
    let output = run_tool(&GitCloneArgs::shallow(url, dir))
        .map_err(|e| PlanError::fetch(format!("{:#}", e)))?;
    if !output.success {
        return Err(PlanError::fetch(format!(
            "{}: {}",
            output.failure_message(),
            output.stderr.trim()
        )));
    }
    Ok(())
}

fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
