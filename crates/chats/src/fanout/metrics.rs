//! Counters for the fan-out pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Best-effort failures never reach the caller, so they are counted here.
#[derive(Debug, Default)]
pub struct FanoutMetrics {
    pub messages_persisted: AtomicU64,
    pub sequence_conflicts: AtomicU64,
    pub events_published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub cache_failures: AtomicU64,
    pub enrichment_failures: AtomicU64,
    pub events_received: AtomicU64,
    pub bus_lagged: AtomicU64,
    pub events_delivered: AtomicU64,
    pub deliveries_dropped: AtomicU64,
    pub reorder_drops: AtomicU64,
    pub reorder_timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_persisted: u64,
    pub sequence_conflicts: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub cache_failures: u64,
    pub enrichment_failures: u64,
    pub events_received: u64,
    pub bus_lagged: u64,
    pub events_delivered: u64,
    pub deliveries_dropped: u64,
    pub reorder_drops: u64,
    pub reorder_timeouts: u64,
}

impl FanoutMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, count: u64) {
        if count > 0 {
            counter.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_persisted: load(&self.messages_persisted),
            sequence_conflicts: load(&self.sequence_conflicts),
            events_published: load(&self.events_published),
            publish_failures: load(&self.publish_failures),
            cache_failures: load(&self.cache_failures),
            enrichment_failures: load(&self.enrichment_failures),
            events_received: load(&self.events_received),
            bus_lagged: load(&self.bus_lagged),
            events_delivered: load(&self.events_delivered),
            deliveries_dropped: load(&self.deliveries_dropped),
            reorder_drops: load(&self.reorder_drops),
            reorder_timeouts: load(&self.reorder_timeouts),
        }
    }
}
