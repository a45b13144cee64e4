// tests/compiler.rs

mod common;
use crate::common::builders::{arg, high_from, req, req_state, HighBuilder};

use serde_json::json;

use highstate::compiler::{
    apply_auto_order, pad_funcs, verify_high, CompileOptions, Compiler, AUTO_ORDER_START,
};
use highstate::errors::StateError;
use highstate::low::{LowChunk, RequisiteKind, RequisiteRef};

fn compile(high: serde_json::Value) -> Vec<LowChunk> {
    Compiler::default()
        .compile(high_from(high))
        .expect("high data compiles")
}

fn ids(chunks: &[LowChunk]) -> Vec<&str> {
    chunks.iter().map(|c| c.id.as_str()).collect()
}

fn chunk<'a>(chunks: &'a [LowChunk], id: &str) -> &'a LowChunk {
    chunks
        .iter()
        .find(|c| c.id == id)
        .unwrap_or_else(|| panic!("no chunk '{id}'"))
}

#[test]
fn pad_funcs_splits_dotted_keys_in_place() {
    let mut h = high_from(json!({
        "vim": {"__sls__": "edit", "pkg.installed": [{"version": "9"}]},
        "short": "service.running",
    }));
    pad_funcs(&mut h);
    assert_eq!(
        h["vim"],
        json!({"__sls__": "edit", "pkg": [{"version": "9"}, "installed"]})
    );
    assert_eq!(h["short"], json!({"service": ["running"]}));
}

#[test]
fn auto_order_skips_explicit_orders() {
    let mut h = high_from(json!({
        "a": {"cmd": ["run"]},
        "b": {"cmd": ["run", {"order": 1}]},
        "c": {"cmd": ["run"]},
    }));
    let next = apply_auto_order(&mut h, AUTO_ORDER_START);
    assert_eq!(next, AUTO_ORDER_START + 2);
    assert_eq!(h["a"]["cmd"][1], json!({"order": 10_000}));
    assert_eq!(h["c"]["cmd"][1], json!({"order": 10_001}));
    assert_eq!(h["b"]["cmd"].as_array().map(Vec::len), Some(2));
}

#[test]
fn verify_high_collects_every_error() {
    let h = high_from(json!({
        "a": {"cmd": ["run", "wait"]},
        "b": {"cmd": [{"name": "x"}]},
        "c": {"cmd": ["run", {"require": "a"}]},
        "d": {"cmd": ["run", {"require": [{"cmd.run": "a"}]}]},
        "e": {"cmd": null},
        "f": {"cmd": ["run", {"names": "x"}]},
    }));
    let errors = verify_high(&h);
    assert_eq!(errors.len(), 6, "{errors:#?}");
    assert!(errors.iter().any(|e| e.contains("Too many functions")));
    assert!(errors.iter().any(|e| e.contains("No function declared")));
    assert!(errors.iter().any(|e| e.contains("needs to be formed as a list")));
    assert!(errors.iter().any(|e| e.contains("did you mean 'cmd'")));
    assert!(errors.iter().any(|e| e.contains("trailing colon")));
    assert!(errors.iter().any(|e| e.contains("'names' argument")));
}

#[test]
fn verify_high_accepts_well_formed_data() {
    let h = high_from(json!({
        "a": {"__sls__": "web", "cmd": ["run", {"name": "echo a"}]},
        "b": {"cmd": ["run", {"require": ["a", {"sls": "web"}]}, {"watch_in": {"cmd": "a"}}]},
    }));
    assert!(verify_high(&h).is_empty());
}

#[test]
fn compile_reports_structural_errors_together() {
    let err = Compiler::default()
        .compile(high_from(json!({
            "a": {"cmd": ["run", "wait"]},
            "b": {"cmd": null},
        })))
        .unwrap_err();
    match err {
        StateError::Compilation(errors) => assert_eq!(errors.len(), 2, "{errors:#?}"),
        other => panic!("expected a compilation error, got {other:?}"),
    }
}

#[test]
fn names_expand_into_one_chunk_per_name() {
    let chunks = compile(json!({
        "pkgs": {"test": ["nop", {"names": ["n1", "n2"]}]},
    }));
    assert_eq!(chunks.len(), 2);
    let names: Vec<&str> = chunks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["n1", "n2"]);
    for c in &chunks {
        assert_eq!(c.id, "pkgs");
        assert_eq!(c.state, "test");
        assert_eq!(c.fun, "nop");
    }
}

#[test]
fn names_entries_can_override_arguments() {
    let chunks = compile(json!({
        "users": {"test": ["nop", {"shell": "/bin/sh"}, {"names": [
            "alice",
            {"bob": [{"shell": "/bin/zsh"}]},
        ]}]},
    }));
    assert_eq!(chunk_named(&chunks, "alice").arg("shell"), Some(&json!("/bin/sh")));
    assert_eq!(chunk_named(&chunks, "bob").arg("shell"), Some(&json!("/bin/zsh")));
}

fn chunk_named<'a>(chunks: &'a [LowChunk], name: &str) -> &'a LowChunk {
    chunks
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no chunk named '{name}'"))
}

#[test]
fn document_order_is_kept() {
    let chunks = compile(json!({
        "zeta": {"test": ["nop"]},
        "alpha": {"test": ["nop"]},
        "mid": {"test": ["nop"]},
    }));
    assert_eq!(ids(&chunks), ["zeta", "alpha", "mid"]);
}

#[test]
fn explicit_first_and_last_override_document_order() {
    let chunks = compile(json!({
        "a": {"test": ["nop", {"order": "last"}]},
        "b": {"test": ["nop"]},
        "c": {"test": ["nop", {"order": "first"}]},
    }));
    assert_eq!(ids(&chunks), ["c", "b", "a"]);
}

#[test]
fn without_auto_order_ties_sort_by_state_name_fun() {
    let compiler = Compiler::new(CompileOptions {
        state_auto_order: false,
        disabled_requisites: Vec::new(),
    });
    let chunks = compiler
        .compile(high_from(json!({
            "c": {"test": ["nop"]},
            "a": {"test": ["nop"]},
            "b": {"test": ["nop"]},
        })))
        .expect("compiles");
    assert_eq!(ids(&chunks), ["a", "b", "c"]);
}

#[test]
fn short_declarations_compile() {
    let chunks = compile(json!({"noop": "test.nop"}));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].full_name(), "test.nop");
    assert_eq!(chunks[0].name, "noop");
}

#[test]
fn declaration_level_require_applies_to_the_module() {
    let chunks = compile(json!({
        "A": {"cmd": ["run", {"name": "echo A"}]},
        "B": {"cmd": ["run", {"name": "echo B"}], "require": [{"cmd": "A"}]},
    }));
    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunk(&chunks, "B").requisites_of(RequisiteKind::REQUIRE),
        [RequisiteRef::state("cmd", "A")]
    );
}

#[test]
fn require_in_is_folded_onto_the_target() {
    let high = HighBuilder::new("web")
        .decl("A", "test", "nop", vec![req_state("require_in", "test", "B")])
        .decl("B", "test", "nop", vec![])
        .build();
    let chunks = Compiler::default().compile(high).expect("compiles");
    assert_eq!(
        chunk(&chunks, "B").requisites_of(RequisiteKind::REQUIRE),
        [RequisiteRef::state("test", "A")]
    );
    assert!(!chunk(&chunks, "A").has_requisite(RequisiteKind::REQUIRE));
}

#[test]
fn watch_in_accepts_a_single_mapping() {
    let high = HighBuilder::new("web")
        .decl("conf", "test", "nop", vec![req("watch_in", json!({"test": "svc"}))])
        .decl("svc", "test", "nop", vec![])
        .build();
    let chunks = Compiler::default().compile(high).expect("compiles");
    assert_eq!(
        chunk(&chunks, "svc").requisites_of(RequisiteKind::WATCH),
        [RequisiteRef::state("test", "conf")]
    );
}

#[test]
fn prereq_adds_a_prerequired_back_edge() {
    let high = HighBuilder::new("web")
        .decl("target", "test", "nop", vec![])
        .decl("guard", "test", "nop", vec![req_state("prereq", "test", "target")])
        .build();
    let chunks = Compiler::default().compile(high).expect("compiles");
    assert_eq!(
        chunk(&chunks, "target").requisites_of(RequisiteKind::PREREQUIRED),
        [RequisiteRef::state("test", "guard")]
    );
}

#[test]
fn use_copies_plain_arguments_only() {
    let high = HighBuilder::new("web")
        .decl(
            "A",
            "test",
            "nop",
            vec![arg("foo", "bar"), arg("name", "x"), req_state("require", "test", "C")],
        )
        .decl("B", "test", "nop", vec![req_state("use", "test", "A")])
        .decl("C", "test", "nop", vec![])
        .build();
    let chunks = Compiler::default().compile(high).expect("compiles");
    let b = chunk(&chunks, "B");
    assert_eq!(b.arg("foo"), Some(&json!("bar")));
    assert_eq!(b.name, "B");
    assert!(!b.has_requisite(RequisiteKind::REQUIRE));
}

#[test]
fn use_does_not_override_own_arguments() {
    let high = HighBuilder::new("web")
        .decl("A", "test", "nop", vec![arg("foo", "bar")])
        .decl("B", "test", "nop", vec![arg("foo", "mine"), req_state("use", "test", "A")])
        .build();
    let chunks = Compiler::default().compile(high).expect("compiles");
    assert_eq!(chunk(&chunks, "B").arg("foo"), Some(&json!("mine")));
}

#[test]
fn extend_merges_into_the_named_declaration() {
    let chunks = compile(json!({
        "A": {"__sls__": "a", "test": ["nop", {"foo": 1}]},
        "B": {"__sls__": "b", "test": ["nop"]},
        "__extend__": [
            {"A": {"test": [{"foo": 2}, {"require": [{"test": "B"}]}]}},
        ],
    }));
    let a = chunk(&chunks, "A");
    assert_eq!(a.arg("foo"), Some(&json!(2)));
    assert_eq!(
        a.requisites_of(RequisiteKind::REQUIRE),
        [RequisiteRef::state("test", "B")]
    );
}

#[test]
fn extend_appends_to_existing_requisites() {
    let chunks = compile(json!({
        "A": {"test": ["nop", {"require": [{"test": "B"}]}]},
        "B": {"test": ["nop"]},
        "C": {"test": ["nop"]},
        "__extend__": [{"A": {"test": [{"require": [{"test": "C"}]}]}}],
    }));
    assert_eq!(
        chunk(&chunks, "A").requisites_of(RequisiteKind::REQUIRE),
        [RequisiteRef::state("test", "B"), RequisiteRef::state("test", "C")]
    );
}

#[test]
fn extending_a_missing_id_is_a_compilation_error() {
    let err = Compiler::default()
        .compile(high_from(json!({
            "A": {"test": ["nop"]},
            "__extend__": [{"Z": {"__sls__": "web", "test": [{"foo": 1}]}}],
        })))
        .unwrap_err();
    match err {
        StateError::Compilation(errors) => {
            assert!(errors[0].contains("Cannot extend ID 'Z'"), "{errors:#?}");
            assert!(errors[0].contains("base:web"), "{errors:#?}");
        }
        other => panic!("expected a compilation error, got {other:?}"),
    }
}

#[test]
fn exclude_by_id_and_by_sls() {
    let chunks = compile(json!({
        "A": {"__sls__": "core", "test": ["nop"]},
        "B": {"__sls__": "core", "test": ["nop"]},
        "C": {"__sls__": "web.app", "test": ["nop"]},
        "D": {"__sls__": "web.db", "test": ["nop"]},
        "__exclude__": [{"id": "B"}, {"sls": "web.*"}],
    }));
    assert_eq!(ids(&chunks), ["A"]);
}

#[test]
fn disabled_requisites_are_stripped() {
    let compiler = Compiler::new(CompileOptions {
        state_auto_order: true,
        disabled_requisites: vec!["require".to_string(), "watch_in".to_string()],
    });
    let high = HighBuilder::new("web")
        .decl("A", "test", "nop", vec![req_state("watch_in", "test", "B")])
        .decl("B", "test", "nop", vec![req_state("require", "test", "A")])
        .build();
    let chunks = compiler.compile(high).expect("compiles");
    let b = chunk(&chunks, "B");
    assert!(!b.has_requisite(RequisiteKind::REQUIRE));
    assert!(!b.has_requisite(RequisiteKind::WATCH));
}
