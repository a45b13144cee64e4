// src/dag/scheduler.rs

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use indexmap::IndexSet;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::dag::graph::Plan;
use crate::dag::report::{ChunkResult, RunningReport};
use crate::dag::state_manager::{RequisiteChecker, ResolvedReqs};
use crate::dag::status::RunStatus;
use crate::engine::Event;
use crate::errors::StateError;
use crate::exec::task_runner::{run_check_cmd, run_checks};
use crate::exec::{ModuleRegistry, StateCall, StateReturn, WatchContext};
use crate::low::{LowChunk, RequisiteKind, Tag};
use crate::types::{Args, STATE_RUNTIME_KEYWORDS};

const RECURSIVE_COMMENT: &str = "Recursive requisite found";
const ONFAIL_COMMENT: &str = "State was not run because onfail req did not change";
const ONCHANGES_COMMENT: &str = "State was not run because none of the onchanges reqs changed";

/// Options that apply to every chunk of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Dry run: state functions are asked what they would change.
    pub test: bool,
    /// Stop the pass after the first failed chunk.
    pub failhard: bool,
}

/// How a single state function call is made.
enum CallMode {
    Normal,
    /// On behalf of a `prereq`: test mode, result goes to the pre-map.
    Speculative,
    /// `mod_watch` in place of the declared function.
    Watch(WatchContext),
}

/// Recursive-descent executor over a [`Plan`].
///
/// Holds the per-pass bookkeeping:
/// - the run counter (`__run_num__`)
/// - the pre-map of speculative `prereq` results
/// - the active set used to detect recursion while forcing dependencies
/// - the prereq / prerequired markers
pub struct Scheduler {
    registry: Arc<dyn ModuleRegistry>,
    options: SchedulerOptions,
    run_num: u64,
    pre: RunningReport,
    active: HashSet<Tag>,
    prereq: HashSet<Tag>,
    prerequired: HashSet<Tag>,
    events: Vec<Event>,
}

impl Scheduler {
    pub fn new(registry: Arc<dyn ModuleRegistry>, options: SchedulerOptions) -> Self {
        Self {
            registry,
            options,
            run_num: 0,
            pre: RunningReport::new(),
            active: HashSet::new(),
            prereq: HashSet::new(),
            prerequired: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn registry(&self) -> &dyn ModuleRegistry {
        self.registry.as_ref()
    }

    pub fn options(&self) -> SchedulerOptions {
        self.options
    }

    /// Build a [`Plan`] against this scheduler's registry.
    pub fn plan(&self, chunks: Vec<LowChunk>) -> crate::errors::Result<Plan> {
        Plan::build(chunks, self.registry.as_ref())
    }

    /// Next `__run_num__` to hand out.
    pub fn run_num(&self) -> u64 {
        self.run_num
    }

    pub fn pre_map(&self) -> &RunningReport {
        &self.pre
    }

    /// Events visible to state functions (`check.event`) during the next
    /// passes.
    pub fn set_events(&mut self, events: Vec<Event>) {
        self.events = events;
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn reset_run_num(&mut self) {
        self.run_num = 0;
    }

    /// Forget everything carried between passes except the run counter.
    pub fn reset(&mut self) {
        self.pre.clear();
        self.active.clear();
        self.prereq.clear();
        self.prerequired.clear();
    }

    /// Run every chunk of `plan` in order, then the listen pass.
    pub fn call_chunks(&mut self, plan: &Plan) -> RunningReport {
        let mut running = RunningReport::new();
        self.run_pass(plan, &mut running);
        self.call_listen(plan, &mut running);
        info!(
            states = running.len(),
            failed = running.iter().filter(|(_, r)| r.failed()).count(),
            "pass complete"
        );
        running
    }

    fn run_pass(&mut self, plan: &Plan, running: &mut RunningReport) {
        for idx in 0..plan.len() {
            if !running.contains(plan.tag(idx)) {
                let flow = self.call_chunk(plan, idx, running);
                if flow.is_break() || self.check_failhard(plan.chunk(idx), running) {
                    warn!(chunk = %plan.tag(idx), "failhard: stopping the pass");
                    self.active.clear();
                    return;
                }
            }
            self.active.clear();
        }
    }

    /// Evaluate chunk `idx`, forcing its dependencies first when needed.
    /// A chunk already recorded in `running` is left alone.
    ///
    /// Returns `Break` when a failhard chunk failed somewhere below.
    pub fn call_chunk(
        &mut self,
        plan: &Plan,
        idx: usize,
        running: &mut RunningReport,
    ) -> ControlFlow<()> {
        let low = plan.chunk(idx);
        let tag = plan.tag(idx).clone();
        if running.contains(&tag) {
            return ControlFlow::Continue(());
        }
        if !low.has_requisite(RequisiteKind::PREREQUIRED) {
            self.active.insert(tag.clone());
        }

        let speculative = self.prereq.contains(&tag);
        let (status, reqs) =
            RequisiteChecker::new(plan, running, &self.pre).check(idx, !speculative);

        match status {
            RunStatus::Unmet => return self.force_requisites(plan, idx, running),
            RunStatus::Met => {
                if speculative {
                    let ret = self.call(plan, idx, running, CallMode::Speculative);
                    self.pre.insert(tag.clone(), ret);
                } else {
                    let ret = self.call(plan, idx, running, CallMode::Normal);
                    running.insert(tag.clone(), ret);
                }
            }
            RunStatus::Fail => {
                let ret = match self.pre.get(&tag).cloned() {
                    Some(pre) => ChunkResult {
                        run_num: Some(self.run_num),
                        sls: low.sls.clone(),
                        ..pre
                    },
                    None => {
                        let comment = format!(
                            "One or more requisite failed: {}",
                            self.failed_requisites(plan, &reqs, running)
                        );
                        let mut ret = ChunkResult::synthetic(low, Some(false), comment);
                        ret.run_num = Some(self.run_num);
                        ret.start_time = Some(now_time());
                        ret.duration = Some(0.0);
                        self.pre.insert(tag.clone(), ret.clone());
                        ret
                    }
                };
                running.insert(tag.clone(), ret);
                self.run_num += 1;
            }
            RunStatus::Change if !speculative => {
                let mut ret = self.call(plan, idx, running, CallMode::Normal);
                if ret.changes.is_empty() && !ret.skip_watch {
                    debug!(chunk = %tag, "no changes; calling mod_watch");
                    let ctx = WatchContext {
                        sfun: low.fun.clone(),
                        reqs: reqs
                            .values()
                            .flatten()
                            .map(|&d| plan.tag(d).clone())
                            .collect(),
                    };
                    ret = self.call(plan, idx, running, CallMode::Watch(ctx));
                }
                running.insert(tag.clone(), ret);
            }
            RunStatus::Pre => {
                let ret = self.skipped(low, Some(true), "No changes detected", true);
                self.pre.insert(tag.clone(), ret.clone());
                running.insert(tag.clone(), ret);
            }
            RunStatus::Onfail => {
                let ret = self.skipped(low, Some(true), ONFAIL_COMMENT, false);
                running.insert(tag.clone(), ret);
            }
            RunStatus::Onchanges => {
                let ret = self.skipped(low, Some(true), ONCHANGES_COMMENT, false);
                running.insert(tag.clone(), ret);
            }
            RunStatus::Change => {
                let ret = self.call(plan, idx, running, CallMode::Speculative);
                self.pre.insert(tag.clone(), ret);
            }
        }

        if let Some(ret) = running.get(&tag) {
            debug!(
                chunk = %tag,
                result = ?ret.result,
                run_num = ?ret.run_num,
                "chunk recorded"
            );
        }
        ControlFlow::Continue(())
    }

    /// The `unmet` branch: mark prereq targets, evaluate every dependency
    /// that has not run yet, then evaluate the chunk again.
    fn force_requisites(
        &mut self,
        plan: &Plan,
        idx: usize,
        running: &mut RunningReport,
    ) -> ControlFlow<()> {
        let low = plan.chunk(idx);
        let tag = plan.tag(idx).clone();
        let speculative = self.prereq.contains(&tag);

        let mut forced = Vec::new();
        for kind in RequisiteChecker::kinds(!speculative) {
            for &dep in plan.deps(idx, kind) {
                if kind == RequisiteKind::PREREQ {
                    self.prereq.insert(plan.tag(dep).clone());
                } else if kind == RequisiteKind::PREREQUIRED {
                    self.prerequired.insert(plan.tag(dep).clone());
                }
                forced.push(dep);
            }
        }

        let before = (running.len(), self.pre.len());
        for dep in forced {
            let dtag = plan.tag(dep);
            if running.contains(dtag) {
                continue;
            }
            if self.active.contains(dtag) {
                if self.prerequired.contains(dtag) {
                    if !self.pre.contains(&tag) {
                        self.prereq.insert(tag.clone());
                        let ret = self.call(plan, idx, running, CallMode::Speculative);
                        self.pre.insert(tag.clone(), ret);
                    }
                    return ControlFlow::Continue(());
                }
                self.record_recursive(low, &tag, running);
                return ControlFlow::Continue(());
            }
            self.call_chunk(plan, dep, running)?;
            if self.check_failhard(plan.chunk(dep), running) {
                return ControlFlow::Break(());
            }
        }

        if self.prereq.contains(&tag) {
            let (status, _) = RequisiteChecker::new(plan, running, &self.pre).check(idx, false);
            let mut ret = self.call(plan, idx, running, CallMode::Speculative);
            if ret.changes.is_empty() && status == RunStatus::Change {
                ret.changes.insert("watch".into(), json!("watch"));
                ret.result = None;
            }
            self.pre.insert(tag, ret);
        } else if (running.len(), self.pre.len()) == before {
            // Forcing made no progress: the chunk can never become ready.
            self.record_recursive(low, &tag, running);
        } else {
            self.call_chunk(plan, idx, running)?;
        }

        if self.check_failhard(low, running) {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn record_recursive(&mut self, low: &LowChunk, tag: &Tag, running: &mut RunningReport) {
        error!(chunk = %tag, "{RECURSIVE_COMMENT}");
        let mut ret = ChunkResult::synthetic(low, Some(false), RECURSIVE_COMMENT);
        ret.run_num = Some(self.run_num);
        self.run_num += 1;
        running.insert(tag.clone(), ret);
    }

    /// Synthetic result for a chunk that is not called.
    fn skipped(&mut self, low: &LowChunk, result: Option<bool>, comment: &str, ran: bool) -> ChunkResult {
        let mut ret = ChunkResult::synthetic(low, result, comment);
        ret.state_ran = ran;
        ret.run_num = Some(self.run_num);
        ret.start_time = Some(now_time());
        ret.duration = Some(0.0);
        self.run_num += 1;
        debug!(chunk = %low.tag(), comment, "state not run");
        ret
    }

    /// `sls.id` labels of the dependencies that recorded `result=False`.
    fn failed_requisites(&self, plan: &Plan, reqs: &ResolvedReqs, running: &RunningReport) -> String {
        let mut failed: IndexSet<String> = IndexSet::new();
        for &dep in reqs.values().flatten() {
            let dtag = plan.tag(dep);
            let ret = self.pre.get(dtag).or_else(|| running.get(dtag));
            if ret.is_some_and(ChunkResult::failed) {
                failed.insert(plan.chunk(dep).label());
            }
        }
        failed.into_iter().collect::<Vec<_>>().join(", ")
    }

    fn check_failhard(&self, low: &LowChunk, running: &RunningReport) -> bool {
        if self.options.test {
            return false;
        }
        let failhard = low.flag("failhard").unwrap_or(self.options.failhard);
        failhard && running.get(&low.tag()).is_some_and(ChunkResult::failed)
    }

    /// Call the state function for chunk `idx` and build its result.
    fn call(&mut self, plan: &Plan, idx: usize, running: &RunningReport, mode: CallMode) -> ChunkResult {
        let low = plan.chunk(idx);
        let started = Local::now();
        let timer = Instant::now();
        let speculative = matches!(mode, CallMode::Speculative);
        info!(name = %low.name, at = %started.format("%H:%M:%S%.6f"), "Running state");

        let watch = match mode {
            CallMode::Watch(ctx) => Some(ctx),
            _ if low.fun == "mod_watch" => Some(WatchContext {
                sfun: low.arg("sfun").and_then(Value::as_str).unwrap_or(&low.fun).to_string(),
                reqs: Vec::new(),
            }),
            _ => None,
        };
        let fun = if watch.is_some() { "mod_watch" } else { low.fun.as_str() };

        let issues = plan.issues(idx);
        if watch.is_none() && !issues.is_empty() {
            let comment: String = issues.iter().map(|e| format!("{e}\n")).collect();
            return self.finish(low, StateReturn::failed(&low.name, comment), fun, speculative, &started, timer);
        }

        let Some(func) = self.registry.lookup(&low.state, fun) else {
            let err = StateError::UnknownStateModule {
                state: low.state.clone(),
                fun: fun.to_string(),
            };
            return self.finish(low, StateReturn::failed(&low.name, err.to_string()), fun, speculative, &started, timer);
        };

        let checks = if ["onlyif", "unless", "creates"].iter().any(|k| low.args.contains_key(*k)) {
            Some(run_checks(low))
        } else {
            None
        };

        let ret = match checks {
            Some(checks) if checks.skip => StateReturn {
                result: Some(true),
                comment: checks.comments.join("\n"),
                skip_watch: checks.skip_watch,
                ..StateReturn::new(&low.name)
            },
            _ => {
                let kwargs = call_kwargs(low);
                let call = StateCall {
                    low,
                    kwargs: &kwargs,
                    test: self.options.test || speculative,
                    events: &self.events,
                    running,
                    watch: watch.as_ref(),
                };
                let mut ret = match func.call(&call) {
                    Ok(ret) => ret,
                    Err(err) => {
                        debug!(chunk = %low.tag(), error = %err, "state function raised");
                        StateReturn::failed(
                            &low.name,
                            format!("An exception occurred in this state: {err:#}"),
                        )
                    }
                };
                if !call.test {
                    if let Some((ok, comment)) = run_check_cmd(low) {
                        ret.result = Some(ok);
                        ret.comment = comment;
                    }
                }
                ret
            }
        };

        self.finish(low, ret, fun, speculative, &started, timer)
    }

    fn finish(
        &mut self,
        low: &LowChunk,
        ret: StateReturn,
        fun: &str,
        speculative: bool,
        started: &chrono::DateTime<Local>,
        timer: Instant,
    ) -> ChunkResult {
        let mut result = ChunkResult::from_return(low, ret);
        result.func = Some(format!("{}.{fun}", low.state));
        if speculative {
            self.prereq.remove(&low.tag());
            return result;
        }

        let duration = timer.elapsed().as_secs_f64() * 1000.0;
        result.run_num = Some(self.run_num);
        self.run_num += 1;
        result.start_time = Some(started.format("%H:%M:%S%.6f").to_string());
        result.duration = Some(duration);
        info!(
            name = %low.name,
            result = ?result.result,
            duration_in_ms = duration,
            "Completed state"
        );
        result
    }

    /// After the main pass: run `mod_watch` for every listener whose
    /// listened-to chunk reported changes.
    fn call_listen(&mut self, plan: &Plan, running: &mut RunningReport) {
        let mut watchers: Vec<LowChunk> = Vec::new();
        let mut seen: HashSet<Tag> = HashSet::new();
        let mut errors: Vec<(Tag, ChunkResult)> = Vec::new();

        for listener in plan.chunks() {
            for req in listener.requisites_of(RequisiteKind::LISTEN) {
                let (lkey, lval) = match req.key() {
                    "id" => {
                        let target = req.target();
                        match plan
                            .chunks()
                            .iter()
                            .rev()
                            .find(|c| c.id == target || c.name == target)
                        {
                            Some(c) => (c.state.clone(), c.id.clone()),
                            None => continue,
                        }
                    }
                    key => (key.to_string(), req.target().to_string()),
                };

                let targets: Vec<&LowChunk> = plan
                    .chunks()
                    .iter()
                    .filter(|c| c.state == lkey && (c.id == lval || c.name == lval))
                    .collect();
                if targets.is_empty() {
                    errors.push(listen_error(&lkey, &lval));
                    continue;
                }

                let changed = targets
                    .iter()
                    .any(|c| running.get(&c.tag()).is_some_and(|r| !r.changes.is_empty()));
                if !changed {
                    continue;
                }

                for chunk in plan.chunks().iter().filter(|c| {
                    c.state == listener.state && (c.id == listener.id || c.name == listener.id)
                }) {
                    let watcher = listener_chunk(chunk);
                    if seen.insert(watcher.tag()) {
                        debug!(listener = %watcher.tag(), "listen requisite fired");
                        watchers.push(watcher);
                    }
                }
            }
        }

        if !watchers.is_empty() {
            let listeners = Plan::unresolved(watchers);
            let mut ret = RunningReport::new();
            self.run_pass(&listeners, &mut ret);
            running.extend(ret);
        }
        for (tag, mut err) in errors {
            err.run_num = Some(self.run_num);
            self.run_num += 1;
            running.insert(tag, err);
        }
    }
}

/// Keyword arguments handed to a state function.
fn call_kwargs(low: &LowChunk) -> Args {
    let mut kwargs: Args = low
        .args
        .iter()
        .filter(|(k, _)| !STATE_RUNTIME_KEYWORDS.contains(&k.as_str()) && k.as_str() != "sfun")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    kwargs.insert("name".into(), Value::String(low.name.clone()));
    kwargs
}

/// Copy of `chunk` that calls `mod_watch` under the id `listener_<id>`.
fn listener_chunk(chunk: &LowChunk) -> LowChunk {
    let mut low = chunk.clone();
    low.args.insert("sfun".into(), Value::String(chunk.fun.clone()));
    low.fun = "mod_watch".into();
    low.id = format!("listener_{}", chunk.id);
    low.requisites.clear();
    low
}

fn listen_error(lkey: &str, lval: &str) -> (Tag, ChunkResult) {
    let tag = Tag::new(
        "Listen_Error",
        &format!("listen_{lval}"),
        &format!("listen_{lkey}"),
        "Listen_Error",
    );
    let ret = ChunkResult {
        name: format!("listen_{lkey}:{lval}"),
        result: Some(false),
        changes: Default::default(),
        comment: format!("Referenced state {lkey}: {lval} does not exist"),
        run_num: None,
        start_time: None,
        duration: None,
        state_ran: true,
        func: None,
        sls: String::new(),
        id: format!("listen_{lval}"),
        warnings: Vec::new(),
        skip_watch: false,
    };
    (tag, ret)
}

fn now_time() -> String {
    Local::now().format("%H:%M:%S%.6f").to_string()
}
