#[cfg(feature = "serde")]
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
    time::Instant,
};

/// Point-in-time copy of a [`Stats`] counter set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StatsSnapshot {
    /// Log notifications received.
    pub total: u64,
    /// Events parsed out of those notifications.
    pub parsed: u64,
    /// Parse errors plus listener callback failures.
    pub errors: u64,
    /// Events or notifications dropped by a filter or by failed-transaction skipping.
    pub filtered: u64,
    /// Listener callback failures (a subset of `errors`).
    pub listener_errors: u64,
    /// Transport drops and failed subscribe attempts.
    pub reconnections: u64,
    /// Parsed events per second since the first notification.
    pub events_per_second: f64,
}

/// Lock-free counters shared between a subscription worker and its dispatcher.
#[derive(Debug, Default)]
pub struct Stats {
    total: AtomicU64,
    parsed: AtomicU64,
    errors: AtomicU64,
    filtered: AtomicU64,
    listener_errors: AtomicU64,
    reconnections: AtomicU64,
    started: OnceLock<Instant>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_notification(&self) {
        self.started.get_or_init(Instant::now);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parsed(&self) {
        self.parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_error(&self) {
        self.listener_errors.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let parsed = self.parsed.load(Ordering::Relaxed);
        let events_per_second = self
            .started
            .get()
            .map(|t| t.elapsed().as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map_or(0.0, |secs| parsed as f64 / secs);
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            parsed,
            errors: self.errors.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            listener_errors: self.listener_errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            events_per_second,
        }
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, rhs: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total + rhs.total,
            parsed: self.parsed + rhs.parsed,
            errors: self.errors + rhs.errors,
            filtered: self.filtered + rhs.filtered,
            listener_errors: self.listener_errors + rhs.listener_errors,
            reconnections: self.reconnections + rhs.reconnections,
            events_per_second: self.events_per_second + rhs.events_per_second,
        }
    }
}
