//! Pending event queue and retry policy.

use crate::types::Event;
use std::time::Duration;

/// Events awaiting transmission, in arrival order.
///
/// Owned by the dispatcher task; producers reach it through the command
/// channel only.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<Event>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to the back of the queue.
    pub fn enqueue(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Re-append events after a failed send, keeping their relative order.
    pub fn requeue(&mut self, events: Vec<Event>) {
        self.events.extend(events);
    }

    /// Get the number of events in the queue.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every queued event, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Check if the queue has grown past `threshold`.
    pub fn exceeds(&self, threshold: usize) -> bool {
        self.events.len() > threshold
    }
}

/// Decides whether a failed event deserves another attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    max_age: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_age: Duration) -> Self {
        Self {
            max_retries,
            max_age,
        }
    }

    /// An event is still valid while it has retries left and is not too old.
    pub fn is_still_valid(&self, event: &Event, now_ms: i64) -> bool {
        let age_ms = now_ms.saturating_sub(event.timestamp());
        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        event.retry_count() < self.max_retries && age_ms <= max_age_ms
    }

    /// Split a failed batch into events to resend and a count of dropped ones.
    ///
    /// Kept events have their retry counter bumped and stay in batch order.
    pub fn reconcile(&self, batch: Vec<Event>, now_ms: i64) -> (Vec<Event>, usize) {
        let total = batch.len();
        let keep: Vec<Event> = batch
            .into_iter()
            .filter(|e| self.is_still_valid(e, now_ms))
            .map(|mut e| {
                e.add_retry();
                e
            })
            .collect();
        let dropped = total - keep.len();
        (keep, dropped)
    }
}
