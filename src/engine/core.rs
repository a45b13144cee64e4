// src/engine/core.rs

//! Pure Thorium core.
//!
//! Owns the compiler, the scheduler and the current plan. It has no
//! channels, no timers and performs no IO besides what the state functions
//! and the [`HighSource`] do, so it can be driven step by step in tests.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::compiler::Compiler;
use crate::dag::{Plan, RunningReport, Scheduler};
use crate::errors::{Result, StateError};
use crate::types::HighData;

use super::Event;

/// Where the core (re)reads its high data from.
pub trait HighSource: Send {
    fn high(&mut self) -> Result<HighData>;
}

impl<F> HighSource for F
where
    F: FnMut() -> Result<HighData> + Send,
{
    fn high(&mut self) -> Result<HighData> {
        self()
    }
}

/// High data read from a JSON file on every recompile.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HighSource for JsonFileSource {
    fn high(&mut self) -> Result<HighData> {
        let text = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<serde_json::Value>(&text)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(StateError::compilation(format!(
                "high data in {} is not a mapping",
                self.path.display()
            ))),
        }
    }
}

pub struct ThoriumCore {
    compiler: Compiler,
    scheduler: Scheduler,
    source: Box<dyn HighSource>,
    plan: Option<Plan>,
    iterations: u64,
    last_report: Option<RunningReport>,
}

impl fmt::Debug for ThoriumCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThoriumCore")
            .field("compiler", &self.compiler)
            .field("chunks", &self.plan.as_ref().map(Plan::len))
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl ThoriumCore {
    pub fn new(compiler: Compiler, scheduler: Scheduler, source: Box<dyn HighSource>) -> Self {
        Self {
            compiler,
            scheduler,
            source,
            plan: None,
            iterations: 0,
            last_report: None,
        }
    }

    /// Re-read the high data and rebuild the plan. The previous plan is kept
    /// when this fails.
    pub fn recompile(&mut self) -> Result<()> {
        let high = self.source.high()?;
        let chunks = self.compiler.compile(high)?;
        let plan = self.scheduler.plan(chunks)?;
        info!(chunks = plan.len(), "thorium plan compiled");
        self.plan = Some(plan);
        Ok(())
    }

    /// Run the plan once with `events` visible to state functions.
    ///
    /// Compiles on first use. Afterwards the run counter and the per-pass
    /// bookkeeping are reset, whatever the outcome.
    pub fn iterate(&mut self, events: Vec<Event>) -> Result<&RunningReport> {
        if self.plan.is_none() {
            self.recompile()?;
        }
        let Some(plan) = self.plan.as_ref() else {
            return Err(StateError::compilation("no plan available"));
        };

        debug!(events = events.len(), "thorium iteration");
        self.scheduler.set_events(events);
        let report = self.scheduler.call_chunks(plan);

        self.scheduler.set_events(Vec::new());
        self.scheduler.reset_run_num();
        self.scheduler.reset();
        self.iterations += 1;
        Ok(self.last_report.insert(report))
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn last_report(&self) -> Option<&RunningReport> {
        self.last_report.as_ref()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
