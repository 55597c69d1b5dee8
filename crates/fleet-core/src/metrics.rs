//! Global atomic counters for fleet lifecycle observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a CLI command completes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    fleets_created: AtomicU64,
    fleets_deleted: AtomicU64,
    agents_reassigned: AtomicU64,
    notifications_published: AtomicU64,
    transport_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            fleets_created: AtomicU64::new(0),
            fleets_deleted: AtomicU64::new(0),
            agents_reassigned: AtomicU64::new(0),
            notifications_published: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_fleets_created(&self) {
        self.fleets_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fleets_created", "counter incremented");
    }

    pub fn inc_fleets_deleted(&self) {
        self.fleets_deleted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fleets_deleted", "counter incremented");
    }

    pub fn inc_agents_reassigned(&self) {
        self.agents_reassigned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agents_reassigned", "counter incremented");
    }

    pub fn inc_notifications_published(&self) {
        self.notifications_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_published", "counter incremented");
    }

    pub fn inc_transport_failures(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "transport_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            fleets_created = self.fleets_created(),
            fleets_deleted = self.fleets_deleted(),
            agents_reassigned = self.agents_reassigned(),
            notifications_published = self.notifications_published(),
            transport_failures = self.transport_failures(),
        );
    }

    pub fn fleets_created(&self) -> u64 {
        self.fleets_created.load(Ordering::Relaxed)
    }

    pub fn fleets_deleted(&self) -> u64 {
        self.fleets_deleted.load(Ordering::Relaxed)
    }

    pub fn agents_reassigned(&self) -> u64 {
        self.agents_reassigned.load(Ordering::Relaxed)
    }

    pub fn notifications_published(&self) -> u64 {
        self.notifications_published.load(Ordering::Relaxed)
    }

    pub fn transport_failures(&self) -> u64 {
        self.transport_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.fleets_created.store(0, Ordering::Relaxed);
        self.fleets_deleted.store(0, Ordering::Relaxed);
        self.agents_reassigned.store(0, Ordering::Relaxed);
        self.notifications_published.store(0, Ordering::Relaxed);
        self.transport_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_fleets_created();
        m.inc_fleets_created();
        assert_eq!(m.fleets_created(), 2);

        m.inc_agents_reassigned();
        m.inc_notifications_published();
        m.inc_notifications_published();
        m.inc_notifications_published();
        assert_eq!(m.agents_reassigned(), 1);
        assert_eq!(m.notifications_published(), 3);
        assert_eq!(m.transport_failures(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_fleets_created();
        m.inc_fleets_deleted();
        m.inc_transport_failures();
        m.reset();
        assert_eq!(m.fleets_created(), 0);
        assert_eq!(m.fleets_deleted(), 0);
        assert_eq!(m.transport_failures(), 0);
    }
}
