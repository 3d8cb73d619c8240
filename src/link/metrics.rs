//! Per-link counters
//!
//! Lock-free counters updated from the manager's tasks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic link counters
#[derive(Debug, Default)]
pub struct LinkMetrics {
    // Connection lifecycle
    pub connect_attempts: AtomicU64,
    pub connect_failures: AtomicU64,
    pub connections_established: AtomicU64,
    pub disconnects: AtomicU64,

    // Outbound
    pub messages_sent: AtomicU64,
    pub messages_queued: AtomicU64,
    pub messages_evicted: AtomicU64,
    pub messages_flushed: AtomicU64,

    // Inbound
    pub messages_received: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn connect_attempted(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connected(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn queued(&self, evicted: bool) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.messages_evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn flushed(&self, count: u64) {
        self.messages_flushed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_evicted: self.messages_evicted.load(Ordering::Relaxed),
            messages_flushed: self.messages_flushed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of link counters for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMetricsSnapshot {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections_established: u64,
    pub disconnects: u64,
    pub messages_sent: u64,
    pub messages_queued: u64,
    pub messages_evicted: u64,
    pub messages_flushed: u64,
    pub messages_received: u64,
}
