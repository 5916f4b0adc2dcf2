//! Per-evaluation backlog held while no subscriber is attached.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::domain::ProgressEvent;

#[derive(Debug)]
struct PendingEvent {
    event: ProgressEvent,
    received_at: Instant,
}

/// Bounded, aged FIFO of undelivered events.
///
/// Non-critical events expire after `max_age`; critical events never expire
/// and are evicted for space only when every buffered event is critical.
#[derive(Debug)]
pub(crate) struct PendingBuffer {
    events: VecDeque<PendingEvent>,
    max_events: usize,
    max_age: Duration,
}

impl PendingBuffer {
    pub(crate) fn new(max_events: usize, max_age: Duration) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: max_events.max(1),
            max_age,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// Append an event, expiring and evicting as needed. Returns the evicted
    /// events so the caller can account for them.
    pub(crate) fn push(&mut self, event: ProgressEvent, now: Instant) -> Vec<ProgressEvent> {
        let mut evicted = self.expire(now);
        while self.events.len() >= self.max_events {
            let victim = self
                .events
                .iter()
                .position(|p| !p.event.is_critical())
                .unwrap_or(0);
            if let Some(p) = self.events.remove(victim) {
                evicted.push(p.event);
            }
        }
        self.events.push_back(PendingEvent {
            event,
            received_at: now,
        });
        evicted
    }

    /// Remove everything still live, oldest first.
    pub(crate) fn drain(&mut self, now: Instant) -> Vec<ProgressEvent> {
        self.expire(now);
        self.events.drain(..).map(|p| p.event).collect()
    }

    fn expire(&mut self, now: Instant) -> Vec<ProgressEvent> {
        let max_age = self.max_age;
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.events.len());
        for pending in self.events.drain(..) {
            let aged_out = now.saturating_duration_since(pending.received_at) > max_age;
            if aged_out && !pending.event.is_critical() {
                expired.push(pending.event);
            } else {
                kept.push_back(pending);
            }
        }
        self.events = kept;
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;

    fn event(kind: EventType, message: &str) -> ProgressEvent {
        ProgressEvent::new("eval-1", kind).with_message(message)
    }

    fn messages(events: &[ProgressEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| e.message.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_count_bound_evicts_oldest_non_critical() {
        let now = Instant::now();
        let mut buffer = PendingBuffer::new(3, Duration::from_secs(30));
        buffer.push(event(EventType::EvaluationError, "crit"), now);
        buffer.push(event(EventType::TechniqueStart, "a"), now);
        buffer.push(event(EventType::TechniqueStart, "b"), now);
        let evicted = buffer.push(event(EventType::TechniqueStart, "c"), now);

        assert_eq!(messages(&evicted), vec!["a"]);
        assert_eq!(messages(&buffer.drain(now)), vec!["crit", "b", "c"]);
    }

    #[test]
    fn test_all_critical_buffer_evicts_oldest_critical() {
        let now = Instant::now();
        let mut buffer = PendingBuffer::new(2, Duration::from_secs(30));
        buffer.push(event(EventType::EvaluationError, "first"), now);
        buffer.push(event(EventType::EvaluationComplete, "second"), now);
        let evicted = buffer.push(event(EventType::EvaluationComplete, "third"), now);
        assert_eq!(messages(&evicted), vec!["first"]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_aged_non_critical_events_expire_but_critical_survive() {
        let start = Instant::now();
        let mut buffer = PendingBuffer::new(10, Duration::from_millis(100));
        buffer.push(event(EventType::TechniqueStart, "old"), start);
        buffer.push(event(EventType::EvaluationComplete, "done"), start);
        let later = start + Duration::from_millis(500);
        buffer.push(event(EventType::TechniqueStart, "fresh"), later);

        assert_eq!(messages(&buffer.drain(later)), vec!["done", "fresh"]);
        assert_eq!(buffer.len(), 0);
    }
}
