//! Property-based tests for hostplan
//!
//! These tests verify:
//! - Operation names round-trip through parsing and JSON
//! - Step statuses round-trip through JSON
//! - Persisted plans load back unchanged
//! - A failure at any position stops the run there, and resume finishes it

use std::cell::Cell;
use std::rc::Rc;

use proptest::prelude::*;
use strum::IntoEnumIterator;

use hostplan::{
    CommandId, CommandRegistry, DataBundle, Engine, ExecutionContext, OpFailure, OpOutput,
    StateStore, StepStatus,
};

fn test_context() -> ExecutionContext {
    ExecutionContext::new("ana", 1000, 1000, "/home/ana", "Test OS", DataBundle::empty())
}

// =============================================================================
// CommandId Property Tests
// =============================================================================

fn command_strategy() -> impl Strategy<Value = CommandId> {
    let all: Vec<CommandId> = CommandId::iter().collect();
    prop::sample::select(all)
}

proptest! {
    /// CommandId: name → parse_name round-trip is identity
    #[test]
    fn command_name_roundtrip(id in command_strategy()) {
        let parsed = CommandId::parse_name(id.as_ref()).expect("should parse");
        prop_assert_eq!(id, parsed);
        prop_assert_eq!(id.to_string(), id.as_ref());
    }

    /// CommandId: serialized form is the bare name
    #[test]
    fn command_json_is_name(id in command_strategy()) {
        let json = serde_json::to_string(&id).expect("serialize");
        prop_assert_eq!(&json, &format!("\"{}\"", id.as_ref()));
        let back: CommandId = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(id, back);
    }

    /// CommandId: names are case sensitive
    #[test]
    fn command_names_are_case_sensitive(id in command_strategy()) {
        let lower = id.as_ref().to_lowercase();
        prop_assert!(CommandId::parse_name(&lower).is_err());
    }
}

// =============================================================================
// StepStatus Property Tests
// =============================================================================

fn status_strategy() -> impl Strategy<Value = StepStatus> {
    prop_oneof![
        Just(StepStatus::Pending),
        Just(StepStatus::Completed),
        (".*", 1u8..=u8::MAX).prop_map(|(message, level)| StepStatus::Failed { message, level }),
    ]
}

proptest! {
    /// StepStatus: JSON round-trip is identity
    #[test]
    fn status_json_roundtrip(status in status_strategy()) {
        let json = serde_json::to_string(&status).expect("serialize");
        let back: StepStatus = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(status, back);
    }

    /// StepStatus: only failures carry a message and a nonzero level
    #[test]
    fn status_error_fields(status in status_strategy()) {
        prop_assert_eq!(status.is_failed(), status.error_message().is_some());
        prop_assert_eq!(status.is_failed(), status.error_level() > 0);
    }
}

// =============================================================================
// Persistence Property Tests
// =============================================================================

fn steps_strategy() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    prop::collection::vec(
        ("[^\\x00]{1,40}", prop::collection::vec(".{0,30}", 0..4)),
        0..12,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Declared plans load back exactly as they were saved
    #[test]
    fn declared_plan_loads_unchanged(steps in steps_strategy()) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        let registry = CommandRegistry::builtin();
        let mut engine = Engine::new(&registry, test_context(), store.clone());

        let mut plan = engine.begin("prop", "generated", "1", None).expect("begin");
        for (description, params) in &steps {
            engine
                .declare(&mut plan, description, "Run", params.clone())
                .expect("declare");
        }

        prop_assert_eq!(plan.len(), steps.len());
        prop_assert_eq!(store.load().expect("load"), plan);
    }

    /// A failure at step k leaves [0, k) completed, k failed and the rest
    /// pending; once the cause is gone, resume executes exactly n - k steps
    #[test]
    fn failure_position_and_resume(n in 1usize..10, k_seed in any::<usize>()) {
        let k = k_seed % n;
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));

        let broken = Rc::new(Cell::new(true));
        let mut registry = CommandRegistry::new();
        {
            let broken = Rc::clone(&broken);
            registry.register_fn(CommandId::Run, move |_, params| {
                if params.first().map(String::as_str) == Some("flaky") && broken.get() {
                    Err(OpFailure::new("not yet"))
                } else {
                    Ok(OpOutput::empty())
                }
            });
        }

        let mut engine = Engine::new(&registry, test_context(), store.clone());
        let mut plan = engine.begin("prop", "", "1", None).expect("begin");
        for i in 0..n {
            let param = if i == k { "flaky" } else { "ok" };
            engine
                .declare(&mut plan, &format!("step {}", i), "Run", vec![param.to_string()])
                .expect("declare");
        }

        let err = engine.run(&mut plan).unwrap_err();
        prop_assert!(err.is_step_failure());

        let persisted = store.load().expect("load");
        for (i, step) in persisted.steps().iter().enumerate() {
            if i < k {
                prop_assert!(step.status().is_completed());
            } else if i == k {
                prop_assert!(step.status().is_failed());
            } else {
                prop_assert_eq!(step.status(), &StepStatus::Pending);
            }
        }

        broken.set(false);
        let mut engine = Engine::new(&registry, test_context(), store.clone());
        let (resumed, summary) = engine.resume().expect("resume");
        prop_assert_eq!(summary.executed, n - k);
        prop_assert_eq!(summary.skipped, k);
        prop_assert!(resumed.is_complete());
    }
}
