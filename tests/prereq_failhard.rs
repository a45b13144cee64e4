// tests/prereq_failhard.rs

mod common;
use crate::common::builders::{arg, req_state, HighBuilder};
use crate::common::{result, run, run_on, run_order, run_with, RecordingRegistry};

use std::sync::Arc;

use highstate::dag::SchedulerOptions;

#[test]
fn prereq_runs_before_a_target_that_will_change() {
    let registry = Arc::new(RecordingRegistry::with_builtins());
    let calls = registry.calls();

    let high = HighBuilder::new("web")
        .decl("config", "test", "succeed_with_changes", vec![])
        .decl("stop", "test", "succeed_without_changes", vec![req_state("prereq", "test", "config")])
        .build();
    let report = run_on(high, registry, SchedulerOptions::default());

    assert_eq!(run_order(&report), ["stop", "config"]);
    assert_eq!(result(&report, "stop").result, Some(true));
    assert_eq!(result(&report, "config").result, Some(true));
    assert!(!result(&report, "config").changes.is_empty());

    // Speculative call of the target, then both real calls.
    assert_eq!(
        *calls.lock().unwrap(),
        [
            "config:test.succeed_with_changes",
            "stop:test.succeed_without_changes",
            "config:test.succeed_with_changes",
        ]
    );
}

#[test]
fn prereq_is_skipped_when_the_target_would_not_change() {
    let report = run(HighBuilder::new("web")
        .decl("config", "test", "succeed_without_changes", vec![])
        .decl("stop", "test", "nop", vec![req_state("prereq", "test", "config")])
        .build());

    let stop = result(&report, "stop");
    assert_eq!(stop.result, Some(true));
    assert_eq!(stop.comment, "No changes detected");
    assert!(stop.changes.is_empty());
    assert_eq!(result(&report, "config").result, Some(true));
    assert_eq!(run_order(&report), ["stop", "config"]);
}

#[test]
fn prereq_in_is_folded_onto_the_guard() {
    let report = run(HighBuilder::new("web")
        .decl("config", "test", "succeed_with_changes", vec![req_state("prereq_in", "test", "stop")])
        .decl("stop", "test", "succeed_without_changes", vec![])
        .build());
    assert_eq!(run_order(&report), ["stop", "config"]);
    assert_eq!(result(&report, "stop").comment, "Success!");
}

#[test]
fn failhard_on_a_chunk_stops_the_pass() {
    let report = run(HighBuilder::new("web")
        .decl("A", "test", "fail_without_changes", vec![arg("failhard", true)])
        .decl("B", "test", "nop", vec![])
        .build());
    assert_eq!(report.len(), 1);
    assert_eq!(result(&report, "A").result, Some(false));
    assert!(report.by_id("B").is_none());
}

#[test]
fn global_failhard_stops_the_pass() {
    let report = run_with(
        HighBuilder::new("web")
            .decl("A", "test", "nop", vec![])
            .decl("B", "test", "fail_without_changes", vec![])
            .decl("C", "test", "nop", vec![])
            .build(),
        SchedulerOptions {
            test: false,
            failhard: true,
        },
    );
    assert_eq!(run_order(&report), ["A", "B"]);
}

#[test]
fn failhard_in_a_forced_dependency_stops_the_pass() {
    let report = run(HighBuilder::new("web")
        .decl("C", "test", "nop", vec![req_state("require", "test", "A")])
        .decl("A", "test", "fail_without_changes", vec![arg("failhard", true)])
        .decl("B", "test", "nop", vec![])
        .build());
    assert_eq!(run_order(&report), ["A"]);
}

#[test]
fn failhard_is_ignored_in_test_mode() {
    let report = run_with(
        HighBuilder::new("web")
            .decl("A", "test", "fail_with_changes", vec![arg("failhard", true)])
            .decl("B", "test", "nop", vec![])
            .build(),
        SchedulerOptions {
            test: true,
            failhard: true,
        },
    );
    assert_eq!(report.len(), 2);
}

#[test]
fn failhard_false_on_a_chunk_overrides_the_global_switch() {
    let report = run_with(
        HighBuilder::new("web")
            .decl("A", "test", "fail_without_changes", vec![arg("failhard", false)])
            .decl("B", "test", "nop", vec![])
            .build(),
        SchedulerOptions {
            test: false,
            failhard: true,
        },
    );
    assert_eq!(report.len(), 2);
}

#[test]
fn prereq_on_a_glob_target_that_already_ran_fails_the_guard() {
    let report = run(HighBuilder::new("web")
        .decl("config1", "test", "succeed_with_changes", vec![])
        .decl("stop", "test", "nop", vec![req_state("prereq", "test", "config*")])
        .build());

    let config = result(&report, "config1");
    assert_eq!(config.result, Some(true));
    assert_eq!(config.run_num, Some(0));

    let stop = result(&report, "stop");
    assert_eq!(stop.result, Some(false));
    assert_eq!(stop.run_num, Some(1));
    assert_eq!(stop.comment, "Recursive requisite found");
}
