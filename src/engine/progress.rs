//! Step progress reporting
//!
//! The engine announces each step through a [`ProgressReporter`]. The
//! console reporter prints one line per step for the operator; tests use
//! [`SilentReporter`] or a recording implementation of their own.

use crate::plan::Step;
use std::io::{self, Write};

/// Totals for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps whose operation was invoked in this run
    pub executed: usize,
    /// Steps skipped because an earlier run completed them
    pub skipped: usize,
    pub total: usize,
}

pub trait ProgressReporter {
    fn step_started(&self, _index: usize, _total: usize, _step: &Step) {}

    fn step_skipped(&self, _index: usize, _step: &Step) {}

    fn step_succeeded(&self, index: usize, step: &Step);

    fn step_failed(&self, index: usize, step: &Step, message: &str, transcript: &str);

    fn run_finished(&self, _summary: &RunSummary) {}
}

/// Reporter that prints nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn step_succeeded(&self, _index: usize, _step: &Step) {}

    fn step_failed(&self, _index: usize, _step: &Step, _message: &str, _transcript: &str) {}
}

/// Width the description column is padded or cut to
const LABEL_WIDTH: usize = 40;

/// Line-per-step reporter for interactive runs
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    fn label(step: &Step) -> String {
        let mut label: String = step.description().chars().take(LABEL_WIDTH).collect();
        let width = label.chars().count();
        label.extend(std::iter::repeat_n(' ', LABEL_WIDTH - width));
        label
    }
}

impl ProgressReporter for ConsoleReporter {
    fn step_started(&self, index: usize, total: usize, step: &Step) {
        print!("  [{:>3}/{:<3}] {} ", index + 1, total, Self::label(step));
        let _ = io::stdout().flush();
    }

    fn step_succeeded(&self, _index: usize, _step: &Step) {
        println!("✓ OK");
    }

    fn step_failed(&self, _index: usize, step: &Step, message: &str, transcript: &str) {
        println!("✗ Failed");
        eprintln!("\n✗ {}: {}", step.description(), message);
        if !transcript.trim().is_empty() {
            eprintln!("--- Output ---");
            eprintln!("{}", transcript.trim_end());
        }
    }

    fn run_finished(&self, summary: &RunSummary) {
        if summary.skipped > 0 {
            println!(
                "\n✓ {} step(s) run, {} already complete",
                summary.executed, summary.skipped
            );
        } else {
            println!("\n✓ {} step(s) run", summary.executed);
        }
    }
}
