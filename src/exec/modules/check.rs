// src/exec/modules/check.rs

use serde_json::Value;

use crate::exec::backend::{Registry, StateCall, StateReturn};
use crate::low::Pattern;

pub(crate) fn register(reg: &mut Registry) {
    reg.register_fn("check", "event", event);
}

/// Succeeds when at least one injected event tag matches the `name` glob.
fn event(call: &StateCall<'_>) -> anyhow::Result<StateReturn> {
    let pattern = Pattern::new(call.name());
    let matched = call
        .events
        .iter()
        .filter(|ev| pattern.matches(&ev.tag))
        .count();

    if matched == 0 {
        return Ok(StateReturn::new(call.name())
            .with_result(Some(false))
            .with_comment("No matching event"));
    }
    Ok(StateReturn::succeeded(call.name(), format!("{matched} matching event(s)"))
        .with_change("matched", Value::from(matched)))
}
