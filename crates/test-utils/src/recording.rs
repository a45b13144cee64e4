use std::sync::{Arc, Mutex};

use highstate::exec::{ModuleRegistry, Registry, StateFunction};

/// A registry that records every state function call.
///
/// Wraps the builtin registry (or any other `Registry`) and appends
/// `"<id>:<state>.<fun>"` to the shared log before delegating.
pub struct RecordingRegistry {
    inner: Registry,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingRegistry {
    pub fn new(inner: Registry) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_builtins() -> Self {
        Self::new(Registry::with_builtins())
    }

    /// Shared handle on the call log.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl ModuleRegistry for RecordingRegistry {
    fn lookup(&self, state: &str, fun: &str) -> Option<Arc<StateFunction>> {
        let inner = self.inner.lookup(state, fun)?;
        let required: Vec<String> = inner.required_args().to_vec();
        let calls = Arc::clone(&self.calls);
        let wrapped = StateFunction::new(inner.full_name().to_string(), move |call| {
            calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", call.low.id, inner.full_name()));
            inner.call(call)
        });
        let required: Vec<&str> = required.iter().map(String::as_str).collect();
        Some(Arc::new(wrapped.requires(&required)))
    }

    fn has_module(&self, state: &str) -> bool {
        self.inner.has_module(state)
    }
}
