// src/engine/runtime.rs

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::core::ThoriumCore;
use super::{Event, EventSource};

/// Pacing of the Thorium loop, usually from the `[thorium]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThoriumOptions {
    /// Target duration of one iteration; also the sleep when no events
    /// arrived.
    pub interval: Duration,
    /// How long one poll of the event source may wait.
    pub event_wait: Duration,
    /// Rebuild the plan from its source this often.
    pub recompile: Duration,
    /// Stop after this many iterations, failed ones included (tests).
    pub max_iterations: Option<u64>,
}

impl Default for ThoriumOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            event_wait: Duration::from_millis(100),
            recompile: Duration::from_secs(300),
            max_iterations: None,
        }
    }
}

/// Async shell around [`ThoriumCore`]: polls events and paces iterations.
pub struct ThoriumRuntime<S: EventSource> {
    core: ThoriumCore,
    events: S,
    options: ThoriumOptions,
}

impl<S: EventSource> fmt::Debug for ThoriumRuntime<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThoriumRuntime")
            .field("core", &self.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: EventSource> ThoriumRuntime<S> {
    pub fn new(core: ThoriumCore, events: S, options: ThoriumOptions) -> Self {
        Self {
            core,
            events,
            options,
        }
    }

    /// Main loop.
    ///
    /// - Drains all queued events.
    /// - Without events: sleeps one interval and polls again.
    /// - Otherwise runs one iteration; an error is logged and the loop
    ///   carries on.
    /// - Sleeps out the rest of the interval and recompiles when due.
    ///
    /// Returns the core once `max_iterations` is reached or the event source
    /// is exhausted.
    pub async fn run(mut self) -> ThoriumCore {
        info!(options = ?self.options, "thorium runtime started");
        let mut compiled_at = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            if self.options.max_iterations.is_some_and(|max| attempts >= max) {
                info!(attempts, "iteration limit reached");
                break;
            }

            let events = self.drain_events().await;
            if events.is_empty() {
                if self.events.is_exhausted() {
                    info!("event source exhausted; stopping thorium");
                    break;
                }
                tokio::time::sleep(self.options.interval).await;
                continue;
            }

            let started = Instant::now();
            attempts += 1;
            match self.core.iterate(events) {
                Ok(report) => debug!(
                    states = report.len(),
                    failed = report.iter().filter(|(_, r)| r.failed()).count(),
                    "thorium iteration complete"
                ),
                Err(err) => error!(error = %err, "thorium iteration failed"),
            }

            let left = self.options.interval.saturating_sub(started.elapsed());
            if !left.is_zero() {
                tokio::time::sleep(left).await;
            }

            if started.duration_since(compiled_at) > self.options.recompile {
                if let Err(err) = self.core.recompile() {
                    error!(error = %err, "thorium recompile failed; keeping previous plan");
                }
                compiled_at = Instant::now();
            }
        }

        self.core
    }

    async fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.events.get_event(self.options.event_wait).await {
            events.push(event);
        }
        if !events.is_empty() {
            debug!(count = events.len(), "drained events");
        }
        events
    }
}
