//! Client-side counters.
//!
//! [`ClientMetrics`] provides lock-free atomic counters for the
//! subscribe loop, dispatcher, and heartbeat task. All counters use
//! `Relaxed` ordering; [`snapshot`](ClientMetrics::snapshot) reads are
//! consistent enough for monitoring purposes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters for one manager instance.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Total subscribe polls issued.
    pub polls_total: AtomicU64,
    /// Subscribe polls that failed (excluding expected timeouts).
    pub poll_failures: AtomicU64,
    /// Typed events delivered to the listener queues.
    pub events_dispatched: AtomicU64,
    /// Events whose payload failed to decode.
    pub decode_errors: AtomicU64,
    /// Backoff waits entered after transient failures.
    pub reconnect_attempts: AtomicU64,
    /// Heartbeat requests that succeeded.
    pub heartbeats_sent: AtomicU64,
    /// Heartbeat requests that failed.
    pub heartbeat_failures: AtomicU64,
}

impl ClientMetrics {
    /// Creates a metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issued subscribe poll.
    pub fn record_poll(&self) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed subscribe poll.
    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one dispatched event.
    pub fn record_event(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a payload decode failure.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records entry into a backoff wait.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful heartbeat.
    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed heartbeat.
    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_total: self.polls_total.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total subscribe polls issued.
    pub polls_total: u64,
    /// Subscribe polls that failed (excluding expected timeouts).
    pub poll_failures: u64,
    /// Typed events delivered to the listener queues.
    pub events_dispatched: u64,
    /// Events whose payload failed to decode.
    pub decode_errors: u64,
    /// Backoff waits entered after transient failures.
    pub reconnect_attempts: u64,
    /// Heartbeat requests that succeeded.
    pub heartbeats_sent: u64,
    /// Heartbeat requests that failed.
    pub heartbeat_failures: u64,
}
