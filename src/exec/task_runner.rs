// src/exec/task_runner.rs

//! Shell command runner and the `onlyif` / `unless` / `creates` /
//! `check_cmd` pre- and post-checks built on it.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::low::LowChunk;

/// Captured result of one shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub retcode: i32,
    pub stdout: String,
    pub stderr: String,
    pub pid: u32,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.retcode == 0
    }
}

/// Options shared by `cmd.run` and the condition checks.
#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
}

impl ShellOptions {
    /// Read `cwd` and `env` (a mapping or list of single-key mappings) from
    /// chunk arguments.
    pub fn from_args(args: &serde_json::Map<String, Value>) -> Self {
        let cwd = args.get("cwd").and_then(Value::as_str).map(str::to_string);
        let mut env = Vec::new();
        match args.get("env") {
            Some(Value::Object(map)) => {
                env.extend(map.iter().map(|(k, v)| (k.clone(), value_to_env(v))));
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(map) = item {
                        env.extend(map.iter().map(|(k, v)| (k.clone(), value_to_env(v))));
                    }
                }
            }
            _ => {}
        }
        Self { cwd, env }
    }
}

fn value_to_env(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run `cmd` through the platform shell and wait for it.
pub fn run_shell(cmd: &str, opts: &ShellOptions) -> Result<ShellOutput> {
    debug!(cmd = %cmd, "running shell command");

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    if let Some(cwd) = &opts.cwd {
        command.current_dir(cwd);
    }
    for (k, v) in &opts.env {
        command.env(k, v);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = command
        .spawn()
        .with_context(|| format!("spawning shell for command '{cmd}'"))?;
    let pid = child.id();
    let output = child
        .wait_with_output()
        .with_context(|| format!("waiting for command '{cmd}'"))?;

    let retcode = output.status.code().unwrap_or(-1);
    debug!(cmd = %cmd, retcode, "shell command exited");

    Ok(ShellOutput {
        retcode,
        stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        pid,
    })
}

/// Return code of `cmd`; a command that cannot be started counts as `fallback`.
fn retcode(cmd: &str, opts: &ShellOptions, fallback: i32) -> i32 {
    match run_shell(cmd, opts) {
        Ok(out) => out.retcode,
        Err(err) => {
            warn!(cmd = %cmd, error = %err, "condition command failed to run");
            fallback
        }
    }
}

/// Outcome of the pre-call checks.
///
/// `skip == true` means the state must not run; the scheduler records
/// `result=True` with `comment` instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    pub skip: bool,
    pub comments: Vec<String>,
    pub skip_watch: bool,
}

fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Evaluate `onlyif`, `unless` and `creates` on a chunk.
///
/// - `onlyif`: every command must exit 0, otherwise skip.
/// - `unless`: skip when every command exits 0.
/// - `creates`: skip when every listed path exists.
///
/// Only shell-command (string) conditions are supported.
pub fn run_checks(low: &LowChunk) -> CheckOutcome {
    let opts = ShellOptions::from_args(&low.args);
    let mut out = CheckOutcome::default();

    if let Some(onlyif) = low.arg("onlyif") {
        let (skip, comment) = check_onlyif(onlyif, &opts);
        out.skip = skip;
        out.skip_watch = skip;
        out.comments.push(comment);
    }

    if let Some(unless) = low.arg("unless") {
        let (skip, comment) = check_unless(unless, &opts);
        out.skip = out.skip || skip;
        out.skip_watch = out.skip_watch || skip;
        out.comments.push(comment);
    }

    if let Some(creates) = low.arg("creates") {
        let (skip, comment) = check_creates(creates);
        out.skip = out.skip || skip;
        out.skip_watch = out.skip_watch || skip;
        out.comments.push(comment);
    }

    out
}

fn check_onlyif(value: &Value, opts: &ShellOptions) -> (bool, String) {
    for entry in as_list(value) {
        match entry {
            Value::String(cmd) => {
                if retcode(cmd, opts, 100) != 0 {
                    return (true, "onlyif condition is false".to_string());
                }
            }
            Value::Bool(false) => return (true, "onlyif condition is false".to_string()),
            Value::Bool(true) => {}
            _ => return (false, "onlyif execution failed, bad type passed".to_string()),
        }
    }
    (false, "onlyif condition is true".to_string())
}

fn check_unless(value: &Value, opts: &ShellOptions) -> (bool, String) {
    for entry in as_list(value) {
        let holds = match entry {
            Value::String(cmd) => retcode(cmd, opts, 0) == 0,
            Value::Bool(b) => *b,
            _ => return (false, "unless condition is false, bad type passed".to_string()),
        };
        if !holds {
            return (false, "unless condition is false".to_string());
        }
    }
    (true, "unless condition is true".to_string())
}

fn check_creates(value: &Value) -> (bool, String) {
    match value {
        Value::String(path) if Path::new(path).exists() => (true, format!("{path} exists")),
        Value::Array(paths)
            if !paths.is_empty()
                && paths
                    .iter()
                    .all(|p| p.as_str().is_some_and(|p| Path::new(p).exists())) =>
        {
            (true, "All files in creates exist".to_string())
        }
        _ => (false, "Creates files not found".to_string()),
    }
}

/// Evaluate `check_cmd` after a state ran: every command must exit 0 for
/// the state to count as successful. `None` when the chunk has no
/// `check_cmd`.
pub fn run_check_cmd(low: &LowChunk) -> Option<(bool, String)> {
    let value = low.arg("check_cmd")?;
    let opts = ShellOptions::from_args(&low.args);
    for entry in as_list(value) {
        let Value::String(cmd) = entry else { continue };
        if retcode(cmd, &opts, 1) != 0 {
            return Some((false, "check_cmd determined the state failed".to_string()));
        }
    }
    Some((true, "check_cmd determined the state succeeded".to_string()))
}
