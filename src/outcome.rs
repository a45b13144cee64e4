// src/outcome.rs

//! Overall success of a finished run.
//!
//! Works on the plain JSON shape of a report (see
//! [`RunningReport::to_value`](crate::dag::RunningReport::to_value)) so that
//! reports nested per host, or produced elsewhere, can be checked too.

use serde_json::{Map, Value};

use crate::low::{Tag, TAG_SEP};

/// A declaration that handles another declaration's failure through
/// `onfail` with `onfail_stop: false`.
#[derive(Debug, Clone, PartialEq)]
pub struct OnfailHandler {
    /// Declaration id of the handler.
    pub id: String,
    /// State module of the handler.
    pub state: String,
    /// The handler's run list as declared.
    pub run: Value,
}

/// `true` when every entry succeeded. Entries without a `result` are
/// treated as nested reports; an empty or non-mapping report is a failure.
pub fn check_result(running: &Value) -> bool {
    check_result_with_high(running, None)
}

/// Like [`check_result`], but failures handled by an `onfail` declaration
/// with `onfail_stop: false` in `highstate` do not count, as long as the
/// handlers themselves succeeded.
pub fn check_result_with_high(running: &Value, highstate: Option<&Value>) -> bool {
    check(running, false, highstate)
}

fn check(running: &Value, recurse: bool, highstate: Option<&Value>) -> bool {
    let Value::Object(map) = running else {
        return false;
    };
    if map.is_empty() {
        return false;
    }

    let mut ret = true;
    for (state_id, state_result) in map {
        let well_formed = if state_id == "__extend__" {
            state_result.is_array()
        } else {
            state_result.is_object()
        };
        if !recurse && !well_formed {
            ret = false;
        }
        if ret {
            if let Value::Object(entry) = state_result {
                match entry.get("result") {
                    Some(Value::Bool(false)) => ret = false,
                    None => ret = check(state_result, true, highstate),
                    Some(_) => {}
                }
            }
        }
        if !ret {
            ret = check_onfail_requisites(state_id, state_result, running, highstate)
                == Some(true);
        }
        if !ret {
            break;
        }
    }
    ret
}

/// Declarations in `highstate` whose `onfail` points at `state_id` and which
/// set `onfail_stop: false`.
///
/// `state_id` is either a bare id or a full tag, in which case the module
/// must match too.
pub fn search_onfail_requisites(state_id: &str, highstate: &Value) -> Vec<OnfailHandler> {
    let (failed_id, failed_state) = split_state_id(state_id);
    let Value::Object(high) = highstate else {
        return Vec::new();
    };

    let mut handlers = Vec::new();
    for (fid, body) in high {
        if *fid == failed_id {
            continue;
        }
        let Value::Object(body) = body else { continue };
        for (module, run) in body {
            if module.starts_with("__") {
                continue;
            }
            let Value::Array(run) = run else { continue };
            if !stops_disabled(run) {
                continue;
            }
            for arg in run {
                let Some(refs) = arg.get("onfail").and_then(Value::as_array) else {
                    continue;
                };
                for entry in refs {
                    if references(entry, &failed_id, failed_state.as_deref()) {
                        handlers.push(OnfailHandler {
                            id: fid.clone(),
                            state: module.clone(),
                            run: Value::Array(run.clone()),
                        });
                    }
                }
            }
        }
    }
    handlers
}

/// Whether a failure of `state_id` is handled.
///
/// - `None`: nothing handles it; the raw result stands.
/// - `Some(true)`: every handler ran and none of them failed.
/// - `Some(false)`: a handler failed, or none of them left a result.
pub fn check_onfail_requisites(
    state_id: &str,
    state_result: &Value,
    running: &Value,
    highstate: Option<&Value>,
) -> Option<bool> {
    let highstate = highstate.filter(|h| h.as_object().is_some_and(|m| !m.is_empty()))?;
    if state_id.is_empty() || !truthy(state_result) {
        return None;
    }
    let handlers = search_onfail_requisites(state_id, highstate);
    if handlers.is_empty() {
        return None;
    }

    let empty = Map::new();
    let running = running.as_object().unwrap_or(&empty);
    let mut outcome = None;
    for handler in &handlers {
        for (key, entry) in running {
            let (id, state) = if key.contains(TAG_SEP) {
                match Tag::from_raw(key.as_str()).split() {
                    Some(parts) => (parts.id, parts.state),
                    None => continue,
                }
            } else {
                let id = entry
                    .get("__id__")
                    .and_then(Value::as_str)
                    .unwrap_or(key)
                    .to_string();
                (id, handler.state.clone())
            };
            if state != handler.state || id != handler.id {
                continue;
            }
            match entry.get("result") {
                Some(Value::Bool(false)) => return Some(false),
                Some(Value::Bool(true)) => outcome = Some(true),
                _ => {}
            }
        }
        if outcome.is_none() {
            outcome = Some(false);
        }
    }
    outcome
}

fn split_state_id(state_id: &str) -> (String, Option<String>) {
    if state_id.contains(TAG_SEP) {
        if let Some(parts) = Tag::from_raw(state_id).split() {
            return (parts.id, Some(parts.state));
        }
    }
    (state_id.to_string(), None)
}

/// `onfail_stop: false` anywhere in the run list.
fn stops_disabled(run: &[Value]) -> bool {
    run.iter()
        .any(|arg| arg.get("onfail_stop") == Some(&Value::Bool(false)))
}

fn references(entry: &Value, id: &str, state: Option<&str>) -> bool {
    match entry {
        Value::String(target) => target == id,
        Value::Object(map) => map.iter().any(|(module, target)| {
            target.as_str() == Some(id) && state.is_none_or(|s| s == module)
        }),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
