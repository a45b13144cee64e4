// src/exec/modules/test.rs

use anyhow::bail;
use serde_json::{json, Value};

use crate::exec::backend::{Registry, StateCall, StateReturn};

const PRETEND_CHANGE: &str = "Something pretended to change";

fn pretend_changes() -> Value {
    json!({"old": "Unchanged", "new": PRETEND_CHANGE})
}

pub(crate) fn register(reg: &mut Registry) {
    reg.register_fn("test", "nop", |call| Ok(StateReturn::succeeded(call.name(), "Success!")));

    reg.register_fn("test", "succeed_without_changes", |call| {
        Ok(StateReturn::succeeded(call.name(), "Success!"))
    });

    reg.register_fn("test", "succeed_with_changes", |call| {
        let ret = StateReturn::succeeded(call.name(), "Success!")
            .with_change("testing", pretend_changes());
        if call.test {
            return Ok(StateReturn {
                result: None,
                comment: "If we weren't testing, this would be successful with changes".into(),
                ..ret
            });
        }
        Ok(ret)
    });

    reg.register_fn("test", "fail_without_changes", |call| {
        if call.test {
            return Ok(StateReturn::new(call.name())
                .with_result(None)
                .with_comment("If we weren't testing, this would be a failure"));
        }
        Ok(StateReturn::failed(call.name(), "Failure!"))
    });

    reg.register_fn("test", "fail_with_changes", |call| {
        let ret = StateReturn::failed(call.name(), "Failure!")
            .with_change("testing", pretend_changes());
        if call.test {
            return Ok(StateReturn {
                result: None,
                comment: "If we weren't testing, this would be failed with changes".into(),
                ..ret
            });
        }
        Ok(ret)
    });

    reg.register_fn("test", "fail_with_exception", |call| {
        bail!("test.fail_with_exception raised for '{}'", call.name())
    });

    reg.register_fn("test", "configurable_test_state", configurable_test_state);

    reg.register_fn("test", "mod_watch", |call| {
        let sfun = call.watch.map(|w| w.sfun.as_str()).unwrap_or("nop");
        Ok(StateReturn::succeeded(call.name(), format!("Watch statement fired ({sfun})."))
            .with_change("watch", Value::Bool(true)))
    });
}

/// `changes` and `result` are taken from the arguments (`true` by default);
/// in test mode a state that would change reports `result=None`.
fn configurable_test_state(call: &StateCall<'_>) -> anyhow::Result<StateReturn> {
    let changes = match call.arg("changes") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(other) => bail!("'changes' must be a boolean, got {other}"),
    };
    let result = match call.arg("result") {
        None => Some(true),
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Null) => None,
        Some(other) => bail!("'result' must be a boolean or null, got {other}"),
    };
    let comment = call.str_arg("comment").unwrap_or_default();

    let mut ret = StateReturn::new(call.name()).with_result(result);
    ret.comment = comment.to_string();
    if changes {
        ret = ret.with_change("testing", pretend_changes());
    }
    if call.test {
        ret.result = if changes { None } else { Some(true) };
        if ret.comment.is_empty() {
            ret.comment = "This is a test".to_string();
        }
    }
    Ok(ret)
}
