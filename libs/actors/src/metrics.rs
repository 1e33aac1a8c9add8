//! Messaging counters
//!
//! Plain atomics shared by every component of a [`crate::MessagingSystem`].
//! Exporting them is left to the embedding service.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// System-wide messaging metrics
#[derive(Debug, Default)]
pub struct MessagingMetrics {
    // Mailbox metrics
    pub envelopes_enqueued: AtomicU64,
    pub envelopes_handled: AtomicU64,
    pub handler_failures: AtomicU64,
    pub dispatch_missing: AtomicU64,
    pub total_handling_time_ns: AtomicU64,
    pub backlog_rejected: AtomicU64,

    // Inbound routing
    pub undeliverable: AtomicU64,
    pub undecodable_frames: AtomicU64,

    // Pending calls
    pub calls_started: AtomicU64,
    pub calls_completed: AtomicU64,
    pub calls_timed_out: AtomicU64,
    pub late_responses: AtomicU64,

    // Proxies
    pub relocation_retries: AtomicU64,
    pub proxies_evicted: AtomicU64,
    pub proxies_idle_disposed: AtomicU64,
    pub transport_failures: AtomicU64,
}

/// Point-in-time copy of [`MessagingMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub envelopes_enqueued: u64,
    pub envelopes_handled: u64,
    pub handler_failures: u64,
    pub dispatch_missing: u64,
    pub backlog_rejected: u64,
    pub undeliverable: u64,
    pub undecodable_frames: u64,
    pub calls_started: u64,
    pub calls_completed: u64,
    pub calls_timed_out: u64,
    pub late_responses: u64,
    pub relocation_retries: u64,
    pub proxies_evicted: u64,
    pub proxies_idle_disposed: u64,
    pub transport_failures: u64,
}

impl MessagingMetrics {
    pub fn record_envelope_handled(&self, duration: Duration) {
        self.envelopes_handled.fetch_add(1, Ordering::Relaxed);
        self.total_handling_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn avg_handling_time_ns(&self) -> f64 {
        let count = self.envelopes_handled.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_handling_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            envelopes_enqueued: load(&self.envelopes_enqueued),
            envelopes_handled: load(&self.envelopes_handled),
            handler_failures: load(&self.handler_failures),
            dispatch_missing: load(&self.dispatch_missing),
            backlog_rejected: load(&self.backlog_rejected),
            undeliverable: load(&self.undeliverable),
            undecodable_frames: load(&self.undecodable_frames),
            calls_started: load(&self.calls_started),
            calls_completed: load(&self.calls_completed),
            calls_timed_out: load(&self.calls_timed_out),
            late_responses: load(&self.late_responses),
            relocation_retries: load(&self.relocation_retries),
            proxies_evicted: load(&self.proxies_evicted),
            proxies_idle_disposed: load(&self.proxies_idle_disposed),
            transport_failures: load(&self.transport_failures),
        }
    }
}
