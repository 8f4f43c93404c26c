use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

use crate::loader::PlanSource;

/// hostplan - resumable, step-by-step host provisioning
#[derive(Parser, Debug)]
#[command(name = "hostplan")]
#[command(about = "Provision a Linux host from a declarative plan, resuming after failures")]
#[command(version)]
pub struct Cli {
    /// Persisted run state file (default: ~/.hostplan/state.json of the
    /// invoking user, or of SUDO_USER when elevated)
    #[arg(long, global = true, env = "HOSTPLAN_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a plan and run it from the first step
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["dir", "repo", "defaults"])
    ))]
    Run {
        /// Local plan directory containing plan.json
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Git repository holding a plan directory
        #[arg(short, long)]
        repo: Option<String>,

        /// Run the bundled default plan
        #[arg(short = 'l', long)]
        defaults: bool,
    },
    /// Continue the previous run from its first incomplete step
    #[command(visible_alias = "continue")]
    Resume,
    /// Show the persisted run, step by step
    Status,
    /// Check a plan directory without running it
    Validate {
        /// Plan directory containing plan.json
        dir: PathBuf,
    },
    /// List the operations a plan can use
    Commands,
}

impl Commands {
    /// Plan source selected by `run`
    pub fn plan_source(&self) -> Option<PlanSource> {
        match self {
            Self::Run { dir: Some(dir), .. } => Some(PlanSource::Directory(dir.clone())),
            Self::Run { repo: Some(url), .. } => Some(PlanSource::Repository(url.clone())),
            Self::Run { defaults: true, .. } => Some(PlanSource::Defaults),
            _ => None,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
