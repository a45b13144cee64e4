// tests/requisites.rs

mod common;
use crate::common::builders::{arg, high_from, req, req_state, HighBuilder};
use crate::common::{result, run, run_on, run_order, run_with, scheduler, RecordingRegistry};

use std::sync::Arc;

use serde_json::json;

use highstate::compiler::Compiler;
use highstate::dag::SchedulerOptions;
use highstate::errors::StateError;

const ONFAIL_COMMENT: &str = "State was not run because onfail req did not change";
const ONCHANGES_COMMENT: &str = "State was not run because none of the onchanges reqs changed";

#[test]
fn require_runs_the_dependency_first() {
    let registry = Arc::new(RecordingRegistry::with_builtins());
    let calls = registry.calls();

    let high = high_from(json!({
        "A": {"cmd": ["run", {"name": "echo A"}]},
        "B": {"cmd": ["run", {"name": "echo B"}], "require": [{"cmd": "A"}]},
    }));
    let report = run_on(high, registry, SchedulerOptions::default());

    assert_eq!(report.len(), 2);
    assert_eq!(*calls.lock().unwrap(), ["A:cmd.run", "B:cmd.run"]);
    let a = result(&report, "A");
    let b = result(&report, "B");
    assert_eq!(a.result, Some(true));
    assert_eq!(b.result, Some(true));
    assert!(a.run_num < b.run_num);
}

#[test]
fn dependencies_declared_later_are_forced() {
    let high = HighBuilder::new("web")
        .decl("C", "test", "nop", vec![req("require", json!([{"sls": "db"}]))])
        .sls("db")
        .decl("A", "test", "nop", vec![])
        .decl("B", "test", "nop", vec![])
        .build();
    let report = run(high);
    assert_eq!(run_order(&report), ["A", "B", "C"]);
}

#[test]
fn missing_requisite_is_fatal() {
    let high = high_from(json!({
        "B": {"cmd": ["run", {"name": "echo B"}, {"require": [{"cmd": "ZZZ"}]}]},
    }));
    let chunks = Compiler::default().compile(high).expect("compiles");
    let err = scheduler(SchedulerOptions::default())
        .plan(chunks)
        .expect_err("ZZZ does not exist");
    match err {
        StateError::MissingRequisite { requisite, id, .. } => {
            assert!(requisite.contains("ZZZ"), "{requisite}");
            assert_eq!(id, "B");
        }
        other => panic!("expected MissingRequisite, got {other:?}"),
    }
}

#[test]
fn requisite_cycles_are_rejected() {
    for kind in ["require", "watch", "onfail", "onchanges"] {
        let high = HighBuilder::new("web")
            .decl("A", "test", "nop", vec![req_state(kind, "test", "B")])
            .decl("B", "test", "nop", vec![req_state("require", "test", "A")])
            .build();
        let chunks = Compiler::default().compile(high).expect("compiles");
        let err = scheduler(SchedulerOptions::default())
            .plan(chunks)
            .expect_err("cycle");
        assert!(
            matches!(err, StateError::RecursiveRequisite { .. }),
            "{kind}: {err:?}"
        );
    }
}

#[test]
fn self_requisite_is_rejected() {
    let high = HighBuilder::new("web")
        .decl("A", "test", "nop", vec![req_state("require", "test", "A")])
        .build();
    let chunks = Compiler::default().compile(high).expect("compiles");
    let err = scheduler(SchedulerOptions::default())
        .plan(chunks)
        .expect_err("cycle");
    match err {
        StateError::RecursiveRequisite {
            source_id,
            target_id,
            ..
        } => {
            assert_eq!(source_id, "A");
            assert_eq!(target_id, "A");
        }
        other => panic!("expected RecursiveRequisite, got {other:?}"),
    }
}

#[test]
fn unknown_state_module_fails_the_plan() {
    let high = high_from(json!({"A": {"nosuch": ["thing"]}}));
    let chunks = Compiler::default().compile(high).expect("compiles");
    let err = scheduler(SchedulerOptions::default())
        .plan(chunks)
        .expect_err("no such module");
    assert!(matches!(err, StateError::Compilation(_)), "{err:?}");
}

#[test]
fn unknown_function_fails_only_that_chunk() {
    let report = run(high_from(json!({
        "A": {"test": ["bogus"]},
        "B": {"test": ["nop"]},
    })));
    let a = result(&report, "A");
    assert_eq!(a.result, Some(false));
    assert!(a.comment.contains("State 'test.bogus' was not found"), "{}", a.comment);
    assert_eq!(result(&report, "B").result, Some(true));
}

#[test]
fn require_needs_every_target_but_require_any_needs_one() {
    let registry = Arc::new(RecordingRegistry::with_builtins());
    let calls = registry.calls();

    let high = HighBuilder::new("web")
        .decl("X", "test", "succeed_without_changes", vec![])
        .decl("Y", "test", "fail_without_changes", vec![])
        .decl(
            "C",
            "test",
            "nop",
            vec![req("require", json!([{"test": "X"}, {"test": "Y"}]))],
        )
        .decl(
            "D",
            "test",
            "nop",
            vec![req("require_any", json!([{"test": "X"}, {"test": "Y"}]))],
        )
        .build();
    let report = run_on(high, registry, SchedulerOptions::default());

    let c = result(&report, "C");
    assert_eq!(c.result, Some(false));
    assert_eq!(c.comment, "One or more requisite failed: web.Y");
    assert_eq!(result(&report, "D").result, Some(true));

    let calls = calls.lock().unwrap();
    assert!(!calls.iter().any(|c| c.starts_with("C:")), "{calls:?}");
    assert!(calls.iter().any(|c| c == "D:test.nop"), "{calls:?}");
}

#[test]
fn failures_propagate_down_a_chain() {
    let report = run(HighBuilder::new("web")
        .decl("A", "test", "fail_without_changes", vec![])
        .decl("B", "test", "nop", vec![req_state("require", "test", "A")])
        .decl("C", "test", "nop", vec![req_state("require", "test", "B")])
        .build());
    assert_eq!(result(&report, "B").result, Some(false));
    let c = result(&report, "C");
    assert_eq!(c.result, Some(false));
    assert_eq!(c.comment, "One or more requisite failed: web.B");
}

#[test]
fn onfail_does_not_run_when_the_target_succeeds() {
    let report = run(HighBuilder::new("web")
        .decl("X", "test", "succeed_with_changes", vec![])
        .decl("C", "test", "nop", vec![req_state("onfail", "test", "X")])
        .build());
    let c = result(&report, "C");
    assert_eq!(c.result, Some(true));
    assert!(c.changes.is_empty());
    assert!(!c.state_ran);
    assert_eq!(c.comment, ONFAIL_COMMENT);
    assert!(c.run_num.is_some());
}

#[test]
fn onfail_runs_when_the_target_fails() {
    let report = run(HighBuilder::new("web")
        .decl("X", "test", "fail_without_changes", vec![])
        .decl("C", "test", "succeed_without_changes", vec![req_state("onfail", "test", "X")])
        .build());
    let c = result(&report, "C");
    assert_eq!(c.result, Some(true));
    assert!(c.state_ran);
    assert_eq!(c.func.as_deref(), Some("test.succeed_without_changes"));
}

#[test]
fn onfail_all_needs_every_target_to_fail() {
    let report = run(HighBuilder::new("web")
        .decl("X", "test", "fail_without_changes", vec![])
        .decl("Y", "test", "succeed_without_changes", vec![])
        .decl(
            "C",
            "test",
            "nop",
            vec![req("onfail_all", json!([{"test": "X"}, {"test": "Y"}]))],
        )
        .build());
    assert_eq!(result(&report, "C").comment, ONFAIL_COMMENT);
}

#[test]
fn onchanges_skips_without_changes() {
    let report = run(HighBuilder::new("web")
        .decl("D", "test", "succeed_without_changes", vec![])
        .decl("C", "test", "nop", vec![req_state("onchanges", "test", "D")])
        .build());
    let c = result(&report, "C");
    assert_eq!(c.result, Some(true));
    assert!(!c.state_ran);
    assert_eq!(c.comment, ONCHANGES_COMMENT);
}

#[test]
fn onchanges_runs_when_the_target_changed() {
    let report = run(HighBuilder::new("web")
        .decl("D", "test", "succeed_with_changes", vec![])
        .decl("C", "test", "succeed_without_changes", vec![req_state("onchanges", "test", "D")])
        .build());
    let c = result(&report, "C");
    assert!(c.state_ran);
    assert_eq!(c.comment, "Success!");
}

#[test]
fn onchanges_any_needs_one_changed_target() {
    let report = run(HighBuilder::new("web")
        .decl("D", "test", "succeed_without_changes", vec![])
        .decl("E", "test", "succeed_with_changes", vec![])
        .decl(
            "C",
            "test",
            "succeed_without_changes",
            vec![req("onchanges_any", json!([{"test": "D"}, {"test": "E"}]))],
        )
        .build());
    assert!(result(&report, "C").state_ran);
}

#[test]
fn watch_falls_back_to_mod_watch() {
    let report = run(HighBuilder::new("web")
        .decl("D", "test", "succeed_with_changes", vec![])
        .decl("C", "test", "succeed_without_changes", vec![req_state("watch", "test", "D")])
        .build());
    let c = result(&report, "C");
    assert_eq!(c.func.as_deref(), Some("test.mod_watch"));
    assert_eq!(c.changes.get("watch"), Some(&json!(true)));
    assert_eq!(c.comment, "Watch statement fired (succeed_without_changes).");
}

#[test]
fn watch_without_changes_runs_the_declared_function() {
    let report = run(HighBuilder::new("web")
        .decl("D", "test", "succeed_without_changes", vec![])
        .decl("C", "test", "succeed_without_changes", vec![req_state("watch", "test", "D")])
        .build());
    assert_eq!(
        result(&report, "C").func.as_deref(),
        Some("test.succeed_without_changes")
    );
}

#[test]
fn watch_on_a_module_without_mod_watch_behaves_like_require() {
    let report = run(high_from(json!({
        "D": {"test": ["succeed_with_changes"]},
        "C": {"check": ["event", {"name": "never/*"}, {"watch": [{"test": "D"}]}]},
    })));
    let c = result(&report, "C");
    assert_eq!(c.func.as_deref(), Some("check.event"));
    assert_eq!(c.result, Some(false));
}

#[test]
fn state_function_errors_become_failed_results() {
    let report = run(high_from(json!({"boom": {"test": ["fail_with_exception"]}})));
    let boom = result(&report, "boom");
    assert_eq!(boom.result, Some(false));
    assert!(
        boom.comment.starts_with("An exception occurred in this state:"),
        "{}",
        boom.comment
    );
}

#[test]
fn test_mode_reports_pending_changes() {
    let report = run_with(
        high_from(json!({"A": {"test": ["succeed_with_changes"]}})),
        SchedulerOptions {
            test: true,
            failhard: false,
        },
    );
    let a = result(&report, "A");
    assert_eq!(a.result, None);
    assert!(!a.changes.is_empty());
}

#[test]
fn configurable_test_state_follows_its_arguments() {
    let report = run(HighBuilder::new("web")
        .decl(
            "A",
            "test",
            "configurable_test_state",
            vec![arg("changes", false), arg("result", true), arg("comment", "quiet")],
        )
        .build());
    let a = result(&report, "A");
    assert_eq!(a.result, Some(true));
    assert!(a.changes.is_empty());
    assert_eq!(a.comment, "quiet");
}

#[test]
fn recheck_does_not_call_the_function_again() {
    let registry = Arc::new(RecordingRegistry::with_builtins());
    let calls = registry.calls();

    let chunks = Compiler::default()
        .compile(high_from(json!({"A": {"test": ["succeed_with_changes"]}})))
        .expect("compiles");
    let mut scheduler =
        highstate::dag::Scheduler::new(registry, SchedulerOptions::default());
    let plan = scheduler.plan(chunks).expect("plan");
    let mut report = scheduler.call_chunks(&plan);
    let before = report.clone();

    let flow = scheduler.call_chunk(&plan, 0, &mut report);
    assert!(flow.is_continue());
    assert_eq!(report, before);
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn run_numbers_are_consecutive_and_unique() {
    let report = run(HighBuilder::new("web")
        .decl("A", "test", "fail_without_changes", vec![])
        .decl("B", "test", "nop", vec![req_state("require", "test", "A")])
        .decl("C", "test", "nop", vec![req_state("onfail", "test", "A")])
        .decl("D", "test", "nop", vec![req_state("onchanges", "test", "C")])
        .build());
    let mut nums: Vec<u64> = report.iter().filter_map(|(_, r)| r.run_num).collect();
    nums.sort_unstable();
    assert_eq!(nums, [0, 1, 2, 3]);
}

#[test]
fn literal_reference_matching_several_names_is_ambiguous() {
    let high = high_from(json!({
        "A": {"test": ["nop", {"name": "same"}]},
        "B": {"test": ["nop", {"name": "same"}]},
        "C": {"test": ["nop", {"require": [{"test": "same"}]}]},
    }));
    let chunks = Compiler::default().compile(high).expect("compiles");
    let err = scheduler(SchedulerOptions::default())
        .plan(chunks)
        .expect_err("two declarations are named 'same'");
    match err {
        StateError::Compilation(errors) => {
            let msg = errors.join("\n");
            assert!(msg.contains("is ambiguous"), "{msg}");
            assert!(msg.contains("matches IDs: A, B"), "{msg}");
        }
        other => panic!("expected Compilation, got {other:?}"),
    }
}

#[test]
fn id_reference_covers_every_module_of_the_declaration() {
    let report = run(high_from(json!({
        "B": {"test": ["nop", {"require": [{"id": "A"}]}]},
        "A": {
            "test": ["succeed_with_changes"],
            "cmd": ["run", {"name": "echo A"}],
        },
    })));

    assert_eq!(report.len(), 3);
    let b = result(&report, "B");
    let a_runs: Vec<_> = report
        .iter()
        .filter(|(_, r)| r.id == "A")
        .map(|(_, r)| (r.result, r.run_num))
        .collect();
    assert_eq!(a_runs.len(), 2);
    for (res, run_num) in a_runs {
        assert_eq!(res, Some(true));
        assert!(run_num < b.run_num);
    }
}

#[test]
fn reference_falls_back_to_the_name() {
    let report = run(high_from(json!({
        "reload": {"test": ["nop", {"require": [{"test": "/etc/app.conf"}]}]},
        "app_config": {"test": ["succeed_with_changes", {"name": "/etc/app.conf"}]},
    })));
    assert_eq!(run_order(&report), ["app_config", "reload"]);
    assert_eq!(result(&report, "reload").result, Some(true));
}

#[test]
fn glob_reference_requires_every_match() {
    let report = run(high_from(json!({
        "lb": {"test": ["nop", {"require": [{"test": "web*"}]}]},
        "web1": {"test": ["succeed_with_changes"]},
        "web2": {"test": ["succeed_with_changes"]},
        "db": {"test": ["nop"]},
    })));
    assert_eq!(run_order(&report), ["web1", "web2", "lb", "db"]);
}
