// src/engine/mod.rs

//! Thorium: continuous evaluation of a plan against an event stream.
//!
//! Each iteration drains the queued events, hands them to the state
//! functions (`check.event` reads them), runs the whole plan and resets the
//! per-pass bookkeeping so every chunk is eligible again next time.
//!
//! The pure, synchronous core lives in [`core`]; the async shell that polls
//! an [`EventSource`] and paces iterations is implemented in [`runtime`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }
}

pub mod core;
pub mod events;
pub mod runtime;

pub use self::core::{HighSource, JsonFileSource, ThoriumCore};
pub use events::{ChannelEventSource, EventSource};
pub use runtime::{ThoriumOptions, ThoriumRuntime};
