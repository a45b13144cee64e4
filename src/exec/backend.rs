// src/exec/backend.rs

//! Pluggable state-module registry.
//!
//! The scheduler never calls state functions directly: it asks a
//! [`ModuleRegistry`] for the callable registered under `(state, fun)`.
//! This keeps the core independent of any concrete module set.
//!
//! - [`Registry`] is the map-backed implementation used in production; its
//!   [`Registry::with_builtins`] constructor registers the `test`, `cmd` and
//!   `check` modules.
//! - Tests can register closures, or provide their own `ModuleRegistry`
//!   that records calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::dag::report::RunningReport;
use crate::engine::Event;
use crate::low::{LowChunk, Tag};
use crate::types::Args;

/// Extra context passed when a state is called because a watched
/// requisite reported changes.
#[derive(Debug, Clone)]
pub struct WatchContext {
    /// The function that was originally declared (`mod_watch` runs in its
    /// place).
    pub sfun: String,
    /// Tags of the requisites that were consulted.
    pub reqs: Vec<Tag>,
}

/// Everything a state function gets to see.
pub struct StateCall<'a> {
    pub low: &'a LowChunk,
    /// Keyword arguments, with runtime-only keywords removed and `name` set.
    pub kwargs: &'a Args,
    /// Dry-run mode: report what would change without changing it.
    pub test: bool,
    /// Events injected by the continuous runtime (empty otherwise).
    pub events: &'a [Event],
    /// Results recorded so far in this pass.
    pub running: &'a RunningReport,
    pub watch: Option<&'a WatchContext>,
}

impl StateCall<'_> {
    pub fn name(&self) -> &str {
        &self.low.name
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(Value::as_str)
    }
}

/// What a state function reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateReturn {
    pub name: String,
    /// `Some(true)` success, `Some(false)` failure, `None` "would change"
    /// (test mode) or "not evaluated".
    pub result: Option<bool>,
    pub changes: Map<String, Value>,
    pub comment: String,
    /// Suppress the `mod_watch` fallback for this call.
    pub skip_watch: bool,
    pub warnings: Vec<String>,
}

impl StateReturn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn succeeded(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            result: Some(true),
            comment: comment.into(),
            ..Self::new(name)
        }
    }

    pub fn failed(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            result: Some(false),
            comment: comment.into(),
            ..Self::new(name)
        }
    }

    pub fn with_change(mut self, key: impl Into<String>, value: Value) -> Self {
        self.changes.insert(key.into(), value);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_result(mut self, result: Option<bool>) -> Self {
        self.result = result;
        self
    }
}

type StateFn = dyn Fn(&StateCall<'_>) -> anyhow::Result<StateReturn> + Send + Sync;

/// A registered state function.
pub struct StateFunction {
    full_name: String,
    required: Vec<String>,
    func: Box<StateFn>,
}

impl StateFunction {
    pub fn new<F>(full_name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StateCall<'_>) -> anyhow::Result<StateReturn> + Send + Sync + 'static,
    {
        Self {
            full_name: full_name.into(),
            required: Vec::new(),
            func: Box::new(func),
        }
    }

    /// Declare keyword arguments without a default. Chunks missing one are
    /// reported as failed when called.
    pub fn requires(mut self, args: &[&str]) -> Self {
        self.required = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn required_args(&self) -> &[String] {
        &self.required
    }

    pub fn call(&self, call: &StateCall<'_>) -> anyhow::Result<StateReturn> {
        (self.func)(call)
    }
}

impl fmt::Debug for StateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateFunction")
            .field("full_name", &self.full_name)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Capability the scheduler uses to find state functions.
pub trait ModuleRegistry: Send + Sync {
    fn lookup(&self, state: &str, fun: &str) -> Option<Arc<StateFunction>>;

    /// `true` when at least one function is registered for `state`.
    fn has_module(&self, state: &str) -> bool;

    fn has_mod_watch(&self, state: &str) -> bool {
        self.lookup(state, "mod_watch").is_some()
    }
}

/// Map-backed [`ModuleRegistry`].
#[derive(Debug, Default, Clone)]
pub struct Registry {
    modules: HashMap<String, HashMap<String, Arc<StateFunction>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin `test`, `cmd` and `check` modules.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        super::modules::register_builtins(&mut reg);
        reg
    }

    pub fn register(&mut self, state: &str, fun: &str, function: StateFunction) -> &mut Self {
        self.modules
            .entry(state.to_string())
            .or_default()
            .insert(fun.to_string(), Arc::new(function));
        self
    }

    /// Register a closure under `state.fun`.
    pub fn register_fn<F>(&mut self, state: &str, fun: &str, func: F) -> &mut Self
    where
        F: Fn(&StateCall<'_>) -> anyhow::Result<StateReturn> + Send + Sync + 'static,
    {
        let function = StateFunction::new(format!("{state}.{fun}"), func);
        self.register(state, fun, function)
    }
}

impl ModuleRegistry for Registry {
    fn lookup(&self, state: &str, fun: &str) -> Option<Arc<StateFunction>> {
        self.modules.get(state).and_then(|funs| funs.get(fun)).cloned()
    }

    fn has_module(&self, state: &str) -> bool {
        self.modules.get(state).is_some_and(|funs| !funs.is_empty())
    }
}
