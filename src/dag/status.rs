// src/dag/status.rs

use std::fmt;

/// Aggregate requisite status of one chunk, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// At least one dependency has not been evaluated yet.
    Unmet,
    /// Everything the chunk depends on is satisfied; call it.
    Met,
    /// A watched dependency reported changes.
    Change,
    /// A prereq target would not change; the chunk is skipped.
    Pre,
    /// No `onfail` dependency failed.
    Onfail,
    /// No `onchanges` dependency changed.
    Onchanges,
    /// A blocking dependency failed.
    Fail,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Unmet => "unmet",
            RunStatus::Met => "met",
            RunStatus::Change => "change",
            RunStatus::Pre => "pre",
            RunStatus::Onfail => "onfail",
            RunStatus::Onchanges => "onchanges",
            RunStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
