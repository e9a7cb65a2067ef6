//! Broadcast EventBus for engine notifications

use super::{EngineEvent, Event};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out channel for engine events.
///
/// Publishing never blocks and never fails the caller: with no subscribers
/// the event is dropped, and a lagging subscriber loses its oldest events.
#[derive(Debug)]
pub struct EventBus {
    publisher: broadcast::Sender<Event>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (publisher, _) = broadcast::channel(capacity.max(1));
        Self {
            publisher,
            published: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.publisher.subscribe()
    }

    pub fn publish(&self, source: &str, payload: EngineEvent) {
        let event = Event::new(source, payload);
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.publisher.send(event).is_err() {
            trace!(source, "No event subscribers, dropping event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.publisher.receiver_count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
