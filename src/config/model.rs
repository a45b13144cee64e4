// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::compiler::CompileOptions;
use crate::dag::SchedulerOptions;
use crate::engine::ThoriumOptions;

/// Configuration as read from `Highstate.toml`, before validation.
///
/// ```toml
/// [state]
/// test = false
/// failhard = false
/// state_auto_order = true
/// disabled_requisites = ["watch_in"]
///
/// [thorium]
/// interval = "500ms"
/// event_wait = "1s"
/// recompile = "300s"
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub state: StateSection,

    #[serde(default)]
    pub thorium: RawThoriumSection,
}

/// `[state]` section: compiler and scheduler switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSection {
    /// Dry run every state function.
    #[serde(default)]
    pub test: bool,

    /// Stop a pass after the first failure.
    #[serde(default)]
    pub failhard: bool,

    /// Use document order for declarations without an explicit `order`.
    #[serde(default = "default_state_auto_order")]
    pub state_auto_order: bool,

    /// Requisite keywords to ignore, e.g. `["watch_in"]`.
    #[serde(default)]
    pub disabled_requisites: Vec<String>,
}

fn default_state_auto_order() -> bool {
    true
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            test: false,
            failhard: false,
            state_auto_order: default_state_auto_order(),
            disabled_requisites: Vec::new(),
        }
    }
}

/// `[thorium]` section with durations still as strings (`"500ms"`, `"1s"`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawThoriumSection {
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub event_wait: Option<String>,
    #[serde(default)]
    pub recompile: Option<String>,
}

/// `[thorium]` with parsed durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThoriumSection {
    pub interval: Duration,
    pub event_wait: Duration,
    pub recompile: Duration,
}

impl Default for ThoriumSection {
    fn default() -> Self {
        let defaults = ThoriumOptions::default();
        Self {
            interval: defaults.interval,
            event_wait: defaults.event_wait,
            recompile: defaults.recompile,
        }
    }
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub state: StateSection,
    pub thorium: ThoriumSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(state: StateSection, thorium: ThoriumSection) -> Self {
        Self { state, thorium }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            state_auto_order: self.state.state_auto_order,
            disabled_requisites: self.state.disabled_requisites.clone(),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            test: self.state.test,
            failhard: self.state.failhard,
        }
    }

    pub fn thorium_options(&self) -> ThoriumOptions {
        ThoriumOptions {
            interval: self.thorium.interval,
            event_wait: self.thorium.event_wait,
            recompile: self.thorium.recompile,
            max_iterations: None,
        }
    }
}
