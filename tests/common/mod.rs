#![allow(dead_code)]

use std::sync::Arc;

use highstate::compiler::Compiler;
use highstate::dag::{ChunkResult, RunningReport, Scheduler, SchedulerOptions};
use highstate::exec::{ModuleRegistry, Registry};
use highstate::types::HighData;

#[allow(unused_imports)]
pub use highstate_test_utils::{builders, init_tracing, recording::RecordingRegistry};

pub fn scheduler(options: SchedulerOptions) -> Scheduler {
    Scheduler::new(Arc::new(Registry::with_builtins()), options)
}

/// Compile `high`, build the plan and run one pass with the builtins.
pub fn run(high: HighData) -> RunningReport {
    run_with(high, SchedulerOptions::default())
}

pub fn run_with(high: HighData, options: SchedulerOptions) -> RunningReport {
    run_on(high, Arc::new(Registry::with_builtins()), options)
}

pub fn run_on(
    high: HighData,
    registry: Arc<dyn ModuleRegistry>,
    options: SchedulerOptions,
) -> RunningReport {
    init_tracing();
    let chunks = Compiler::default().compile(high).expect("high data compiles");
    let mut scheduler = Scheduler::new(registry, options);
    let plan = scheduler.plan(chunks).expect("plan builds");
    scheduler.call_chunks(&plan)
}

pub fn result<'a>(report: &'a RunningReport, id: &str) -> &'a ChunkResult {
    report
        .by_id(id)
        .unwrap_or_else(|| panic!("no result for '{id}' in {:#?}", report.to_value()))
}

/// Declaration ids in `__run_num__` order.
pub fn run_order(report: &RunningReport) -> Vec<String> {
    report
        .in_run_order()
        .into_iter()
        .map(|(_, r)| r.id.clone())
        .collect()
}
