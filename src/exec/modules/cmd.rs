// src/exec/modules/cmd.rs

use serde_json::Value;
use tracing::info;

use crate::exec::backend::{Registry, StateCall, StateFunction, StateReturn};
use crate::exec::task_runner::{run_shell, ShellOptions};

pub(crate) fn register(reg: &mut Registry) {
    reg.register("cmd", "run", StateFunction::new("cmd.run", run).requires(&["name"]));
    reg.register("cmd", "wait", StateFunction::new("cmd.wait", wait).requires(&["name"]));
    reg.register("cmd", "mod_watch", StateFunction::new("cmd.mod_watch", mod_watch));
}

/// Execute `name` through the shell. Always reports changes when the
/// command ran; succeeds when it exits 0.
fn run(call: &StateCall<'_>) -> anyhow::Result<StateReturn> {
    let cmd = call.name();
    if call.test {
        return Ok(StateReturn::new(cmd)
            .with_result(None)
            .with_comment(format!("Command \"{cmd}\" would have been executed")));
    }

    let opts = ShellOptions::from_args(call.kwargs);
    let out = run_shell(cmd, &opts)?;
    info!(cmd = %cmd, retcode = out.retcode, "cmd.run finished");

    let ret = StateReturn::new(cmd)
        .with_result(Some(out.success()))
        .with_comment(format!("Command \"{cmd}\" run"))
        .with_change("pid", Value::from(out.pid))
        .with_change("retcode", Value::from(out.retcode))
        .with_change("stdout", Value::String(out.stdout))
        .with_change("stderr", Value::String(out.stderr));
    Ok(ret)
}

/// Does nothing on its own; runs the command only when triggered through
/// `watch` (see [`mod_watch`]).
fn wait(call: &StateCall<'_>) -> anyhow::Result<StateReturn> {
    Ok(StateReturn::succeeded(call.name(), ""))
}

fn mod_watch(call: &StateCall<'_>) -> anyhow::Result<StateReturn> {
    let sfun = call.watch.map(|w| w.sfun.as_str()).unwrap_or("run");
    match sfun {
        "run" | "wait" | "watch" => run(call),
        other => Ok(StateReturn::failed(
            call.name(),
            format!("cmd.{other} does not work with the watch requisite, please use cmd.wait or cmd.run"),
        )),
    }
}
