//! Global atomic counters for engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event, e.g. when an evaluation completes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    techniques_succeeded: AtomicU64,
    techniques_failed: AtomicU64,
    techniques_timed_out: AtomicU64,
    events_emitted: AtomicU64,
    events_dropped: AtomicU64,
    critical_events_dropped: AtomicU64,
    events_delivered: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            techniques_succeeded: AtomicU64::new(0),
            techniques_failed: AtomicU64::new(0),
            techniques_timed_out: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            critical_events_dropped: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
        }
    }

    pub fn inc_techniques_succeeded(&self) {
        self.techniques_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed technique. Timeouts also bump the timed-out counter.
    pub fn inc_techniques_failed(&self, timed_out: bool) {
        self.techniques_failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.techniques_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_events_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped event; critical drops are tracked separately too.
    pub fn inc_events_dropped(&self, critical: bool) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        if critical {
            self.critical_events_dropped.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "events_dropped", critical, "counter incremented");
    }

    pub fn inc_events_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            techniques_succeeded = self.techniques_succeeded(),
            techniques_failed = self.techniques_failed(),
            techniques_timed_out = self.techniques_timed_out(),
            events_emitted = self.events_emitted(),
            events_dropped = self.events_dropped(),
            critical_events_dropped = self.critical_events_dropped(),
            events_delivered = self.events_delivered(),
        );
    }

    pub fn techniques_succeeded(&self) -> u64 {
        self.techniques_succeeded.load(Ordering::Relaxed)
    }

    pub fn techniques_failed(&self) -> u64 {
        self.techniques_failed.load(Ordering::Relaxed)
    }

    pub fn techniques_timed_out(&self) -> u64 {
        self.techniques_timed_out.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn critical_events_dropped(&self) -> u64 {
        self.critical_events_dropped.load(Ordering::Relaxed)
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.techniques_succeeded.store(0, Ordering::Relaxed);
        self.techniques_failed.store(0, Ordering::Relaxed);
        self.techniques_timed_out.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.critical_events_dropped.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
    }
}
