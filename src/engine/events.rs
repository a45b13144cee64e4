// src/engine/events.rs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use super::Event;

/// Polling access to an event bus.
pub trait EventSource: Send {
    /// Wait up to `wait` for the next event; `None` means nothing is queued
    /// right now.
    fn get_event(
        &mut self,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Event>> + Send + '_>>;

    /// `true` once the source can never yield another event.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// [`EventSource`] backed by a tokio mpsc channel.
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Event>,
    closed: bool,
}

impl ChannelEventSource {
    pub fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self { rx, closed: false }
    }

    /// A source together with the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Event>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl EventSource for ChannelEventSource {
    fn get_event(
        &mut self,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Event>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return None;
            }
            match tokio::time::timeout(wait, self.rx.recv()).await {
                Ok(Some(event)) => Some(event),
                Ok(None) => {
                    debug!("event channel closed");
                    self.closed = true;
                    None
                }
                Err(_elapsed) => None,
            }
        })
    }

    fn is_exhausted(&self) -> bool {
        self.closed
    }
}
