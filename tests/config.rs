// tests/config.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use highstate::config::{load_and_validate, load_from_path, parse_duration};
use highstate::errors::StateError;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn full_config_is_loaded() {
    let file = write_config(
        r#"
[state]
test = true
failhard = true
state_auto_order = false
disabled_requisites = ["watch_in", "require_in"]

[thorium]
interval = "250ms"
event_wait = "1s"
recompile = "5m"
"#,
    );
    let cfg = load_and_validate(file.path()).expect("valid config");

    let compile = cfg.compile_options();
    assert!(!compile.state_auto_order);
    assert_eq!(compile.disabled_requisites, ["watch_in", "require_in"]);

    let sched = cfg.scheduler_options();
    assert!(sched.test);
    assert!(sched.failhard);

    let thorium = cfg.thorium_options();
    assert_eq!(thorium.interval, Duration::from_millis(250));
    assert_eq!(thorium.event_wait, Duration::from_secs(1));
    assert_eq!(thorium.recompile, Duration::from_secs(300));
    assert_eq!(thorium.max_iterations, None);
}

#[test]
fn empty_config_uses_defaults() {
    let file = write_config("");
    let cfg = load_and_validate(file.path()).expect("valid config");

    assert!(cfg.state.state_auto_order);
    assert!(!cfg.state.test);
    assert!(!cfg.state.failhard);
    assert!(cfg.state.disabled_requisites.is_empty());
    assert_eq!(cfg.thorium.interval, Duration::from_millis(500));
    assert_eq!(cfg.thorium.event_wait, Duration::from_millis(100));
    assert_eq!(cfg.thorium.recompile, Duration::from_secs(300));
}

#[test]
fn bad_duration_names_the_key() {
    let file = write_config("[thorium]\nevent_wait = \"soon\"\n");
    match load_and_validate(file.path()) {
        Err(StateError::Config(msg)) => assert!(msg.starts_with("[thorium].event_wait:"), "{msg}"),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn zero_interval_is_rejected() {
    let file = write_config("[thorium]\ninterval = \"0s\"\n");
    match load_and_validate(file.path()) {
        Err(StateError::Config(msg)) => {
            assert_eq!(msg, "[thorium].interval must be greater than zero")
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn unknown_disabled_requisite_is_rejected() {
    let file = write_config("[state]\ndisabled_requisites = [\"depends_on\"]\n");
    match load_and_validate(file.path()) {
        Err(StateError::Config(msg)) => assert!(msg.contains("'depends_on'"), "{msg}"),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn unknown_keys_are_rejected() {
    let file = write_config("[state]\nparallel = true\n");
    assert!(matches!(load_from_path(file.path()), Err(StateError::Toml(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("Highstate.toml");
    assert!(matches!(load_and_validate(&missing), Err(StateError::Io(_))));
}

#[test]
fn durations_parse() {
    assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
    assert_eq!(parse_duration(" 2s "), Ok(Duration::from_secs(2)));
    assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert_eq!(parse_duration("10MS"), Ok(Duration::from_millis(10)));

    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("10d").is_err());
    assert!(parse_duration("ms").is_err());
}
