//! Execution engine: declares steps, runs them in order and persists every
//! outcome.
//!
//! The engine is the only code that mutates a [`Plan`]. Each mutation is
//! followed, on the same control-flow path, by a whole-snapshot write through
//! the [`StateStore`], so the file on disk never lags the plan in memory.
//!
//! # Run semantics
//!
//! - Steps run strictly in declaration order, one at a time.
//! - `Completed` steps are skipped; `Pending` and `Failed` steps are executed.
//! - The first failure is persisted, reported, and returned as
//!   [`PlanError::StepExecution`]. Later steps are not touched.
//!
//! Resuming is not a separate mode: it loads the snapshot and calls
//! [`Engine::run`] on it.

mod progress;

pub use progress::{ConsoleReporter, ProgressReporter, RunSummary, SilentReporter};

use crate::context::{DataBundle, ExecutionContext};
use crate::error::{PlanError, Result};
use crate::plan::{Plan, Step};
use crate::registry::CommandRegistry;
use crate::state_store::StateStore;
use std::path::Path;

pub struct Engine<'a> {
    registry: &'a CommandRegistry,
    context: ExecutionContext,
    store: StateStore,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Engine<'a> {
    pub fn new(registry: &'a CommandRegistry, context: ExecutionContext, store: StateStore) -> Self {
        Self {
            registry,
            context,
            store,
            reporter: &SilentReporter,
        }
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        self.registry
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Start a fresh plan and persist its empty snapshot.
    ///
    /// Any previous snapshot is replaced. `data_dir` becomes the data bundle
    /// for this run and is recorded so a resume can reopen it.
    pub fn begin(
        &mut self,
        name: &str,
        description: &str,
        version: &str,
        data_dir: Option<&Path>,
    ) -> Result<Plan> {
        let mut plan = Plan::new(name, description, version);
        if let Some(dir) = data_dir {
            plan = plan.with_data_dir(dir);
        }
        self.attach_data(&plan);
        self.store.save(&plan)?;
        tracing::info!(plan = name, state = %self.store.path().display(), "new run started");
        Ok(plan)
    }

    /// Append a step naming `command` and persist the plan.
    ///
    /// # Errors
    ///
    /// `UnknownCommand` if `command` is not a registered operation. The plan
    /// and the snapshot are left exactly as they were.
    pub fn declare(
        &self,
        plan: &mut Plan,
        description: &str,
        command: &str,
        params: Vec<String>,
    ) -> Result<()> {
        let (id, _) = self.registry.resolve_name(command)?;
        plan.push_step(Step::new(description.to_string(), id, params));
        self.store.save(plan)?;
        tracing::debug!(index = plan.len() - 1, command = %id, description, "step declared");
        Ok(())
    }

    /// Execute every incomplete step in order, stopping at the first failure.
    pub fn run(&self, plan: &mut Plan) -> Result<RunSummary> {
        let total = plan.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };

        tracing::info!(plan = plan.name(), steps = total, "running plan");

        for index in 0..total {
            let Some(step) = plan.steps().get(index) else {
                break;
            };

            if step.is_completed() {
                tracing::debug!(index, description = step.description(), "already completed, skipping");
                self.reporter.step_skipped(index, step);
                summary.skipped += 1;
                continue;
            }

            let command = step.command();
            let params = step.params().to_vec();
            let operation = self.registry.resolve(command)?;

            self.reporter.step_started(index, total, step);
            tracing::debug!(index, command = %command, description = step.description(), "executing step");

            let outcome = operation.execute(&self.context, &params);
            summary.executed += 1;

            match outcome {
                Ok(output) => {
                    if !output.transcript.is_empty() {
                        tracing::debug!(index, transcript = %output.transcript.trim_end(), "step output");
                    }
                    self.update(plan, index, |s| s.mark_completed())?;
                    self.report(plan, index, |r, s| r.step_succeeded(index, s));
                }
                Err(failure) => {
                    self.update(plan, index, |s| {
                        s.mark_failed(failure.message.clone(), failure.level)
                    })?;
                    self.report(plan, index, |r, s| {
                        r.step_failed(index, s, &failure.message, &failure.transcript)
                    });
                    tracing::error!(
                        index,
                        command = %command,
                        level = failure.level,
                        "step failed: {}",
                        failure.message
                    );
                    return Err(PlanError::StepExecution {
                        index,
                        description: plan
                            .steps()
                            .get(index)
                            .map(|s| s.description().to_string())
                            .unwrap_or_default(),
                        message: failure.message,
                        transcript: failure.transcript,
                        level: failure.level.max(1),
                    });
                }
            }
        }

        tracing::info!(
            executed = summary.executed,
            skipped = summary.skipped,
            "plan complete"
        );
        self.reporter.run_finished(&summary);
        Ok(summary)
    }

    /// Load the persisted snapshot and check it against the registry.
    ///
    /// # Errors
    ///
    /// - `NoPreviousRun` / `CorruptState` from the store
    /// - `UnknownCommand` if a persisted step names an unregistered operation
    pub fn load_persisted(&self) -> Result<Plan> {
        let plan = self.store.load()?;
        if let Some(missing) = plan
            .steps()
            .iter()
            .map(Step::command)
            .find(|id| !self.registry.contains(*id))
        {
            return Err(PlanError::unknown_command(missing.as_ref()));
        }
        Ok(plan)
    }

    /// Continue the persisted run from its first incomplete step
    pub fn resume(&mut self) -> Result<(Plan, RunSummary)> {
        let mut plan = self.load_persisted()?;
        self.attach_data(&plan);

        let counts = plan.counts();
        tracing::info!(
            plan = plan.name(),
            completed = counts.completed,
            failed = counts.failed,
            pending = counts.pending,
            "resuming run"
        );

        let summary = self.run(&mut plan)?;
        Ok((plan, summary))
    }

    /// Point the context at the plan's data directory
    fn attach_data(&mut self, plan: &Plan) {
        let bundle = match plan.data_dir() {
            Some(dir) if dir.is_dir() => DataBundle::open(dir),
            Some(dir) => {
                tracing::warn!(
                    dir = %dir.display(),
                    "data directory is gone, steps that read data files will fail"
                );
                DataBundle::empty()
            }
            None => DataBundle::empty(),
        };
        self.context = self.context.clone().with_data(bundle);
    }

    /// Mutate one step, then persist the whole plan
    fn update(&self, plan: &mut Plan, index: usize, f: impl FnOnce(&mut Step)) -> Result<()> {
        if let Some(step) = plan.step_mut(index) {
            f(step);
        }
        self.store.save(plan)
    }

    fn report(&self, plan: &Plan, index: usize, f: impl FnOnce(&dyn ProgressReporter, &Step)) {
        if let Some(step) = plan.steps().get(index) {
            f(self.reporter, step);
        }
    }
}
