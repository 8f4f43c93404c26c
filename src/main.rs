//! hostplan - Main entry point
//!
//! Parses the command line, resolves who the run is for, and drives the
//! engine. Every failure ends the process with status 1; signals end it with
//! 128 + signal number (see `process_guard`).

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hostplan::cli::{Cli, Commands};
use hostplan::loader::{self, PlanDefinition};
use hostplan::process_guard::{self, ProcessGuard};
use hostplan::state_store::{StateStore, STATE_DIR};
use hostplan::{
    CommandRegistry, ConsoleReporter, DataBundle, Engine, ExecutionContext, Identity, Plan,
    PlanError, StepStatus,
};

/// Initialize tracing; `RUST_LOG` wins over the verbosity flag
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);
    tracing::debug!(?cli, "arguments parsed");

    // Child tools are terminated if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        tracing::warn!("Failed to initialize signal handlers: {}", e);
    }
    let guard = ProcessGuard::new();

    let code = match dispatch(&cli) {
        Ok(()) => 0,
        Err(e) => {
            report_error(&e);
            1
        }
    };

    drop(guard);
    std::process::exit(code);
}

fn dispatch(cli: &Cli) -> Result<()> {
    let registry = CommandRegistry::builtin();

    match &cli.command {
        Commands::Commands => {
            list_commands(&registry);
            Ok(())
        }
        Commands::Validate { dir } => {
            let definition = loader::validate_definition(dir, &registry)
                .with_context(|| format!("Plan in {} is invalid", dir.display()))?;
            println!(
                "✓ Plan '{}' is valid: {} step(s), version {}",
                definition.name,
                definition.steps.len(),
                definition.version
            );
            let commands = definition.commands();
            let used: Vec<&str> = commands.iter().map(|id| id.as_ref()).collect();
            println!("  Operations: {}", used.join(", "));
            Ok(())
        }
        Commands::Status => {
            let ctx = resolve_context()?;
            let store = state_store(cli, &ctx);
            let plan = store.load()?;
            print_status(&plan, &store);
            Ok(())
        }
        Commands::Resume => {
            let ctx = resolve_context()?;
            let store = state_store(cli, &ctx);
            print_banner(&ctx);

            let reporter = ConsoleReporter;
            let mut engine = Engine::new(&registry, ctx, store).with_reporter(&reporter);
            let (plan, _) = engine.resume()?;
            println!("✓ Plan '{}' complete", plan.name());
            Ok(())
        }
        Commands::Run { .. } => {
            let source = cli
                .command
                .plan_source()
                .context("No plan source given")?;
            let ctx = resolve_context()?;
            let store = state_store(cli, &ctx);
            let work_dir = work_dir(&store, &ctx);
            print_banner(&ctx);

            tracing::info!(%source, "loading plan");
            let dir = source
                .prepare(&work_dir)
                .with_context(|| format!("Failed to load plan from {}", source))?;
            let definition = PlanDefinition::load_from_dir(&dir)?;

            if store.exists() {
                tracing::info!(state = %store.path().display(), "replacing the previous run");
            }

            let reporter = ConsoleReporter;
            let mut engine = Engine::new(&registry, ctx, store).with_reporter(&reporter);
            let mut plan = loader::declare_plan(&mut engine, &definition, &dir)?;
            engine.run(&mut plan)?;
            println!("✓ Plan '{}' complete", plan.name());
            Ok(())
        }
    }
}

fn resolve_context() -> Result<ExecutionContext> {
    ExecutionContext::resolve(&Identity::from_env(), DataBundle::empty())
        .context("Cannot determine the target user")
}

/// `--state-file` / `HOSTPLAN_STATE_FILE`, else the target user's home
fn state_store(cli: &Cli, ctx: &ExecutionContext) -> StateStore {
    match &cli.state_file {
        Some(path) => StateStore::new(path),
        None => StateStore::for_home(ctx.home()),
    }
}

/// Directory next to the state file that holds extracted or cloned plans
fn work_dir(store: &StateStore, ctx: &ExecutionContext) -> PathBuf {
    store
        .path()
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.home().join(STATE_DIR))
}

fn print_banner(ctx: &ExecutionContext) {
    println!("hostplan {}", env!("CARGO_PKG_VERSION"));
    println!("Target user: {} on {}\n", ctx.user(), ctx.os_release());
}

fn list_commands(registry: &CommandRegistry) {
    println!("Available commands:");
    for id in registry.commands() {
        println!("  {:<22} {}", id.as_ref(), id.usage());
    }
}

fn print_status(plan: &Plan, store: &StateStore) {
    println!("Plan: {} (version {})", plan.name(), plan.version());
    if !plan.description().is_empty() {
        println!("      {}", plan.description());
    }
    println!("State: {}\n", store.path().display());

    for (index, step) in plan.steps().iter().enumerate() {
        let mark = match step.status() {
            StepStatus::Completed => "✓",
            StepStatus::Failed { .. } => "✗",
            StepStatus::Pending => "·",
        };
        print!("  [{:>3}] {} {}", index + 1, mark, step.description());
        match step.status().error_message() {
            Some(message) => println!(": {}", message),
            None => println!(),
        }
    }

    let counts = plan.counts();
    println!(
        "\n{} completed, {} failed, {} pending",
        counts.completed, counts.failed, counts.pending
    );
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<PlanError>() {
        // Already reported with its transcript by the console reporter
        Some(e) if e.is_step_failure() => {
            eprintln!("\nFix the problem, then run `hostplan resume` to continue.");
        }
        Some(PlanError::NoPreviousRun { .. }) => {
            eprintln!("✗ {:#}", err);
            eprintln!("Start a run with `hostplan run --dir <DIR>`, `--repo <URL>` or `--defaults`.");
        }
        _ => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("✗ {:#}", err);
        }
    }
}
