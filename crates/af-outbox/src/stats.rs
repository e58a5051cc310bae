//! Running totals across dispatcher ticks, shared with the metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatcher::TickReport;

#[derive(Debug, Default)]
pub struct DispatcherStats {
    ticks: AtomicU64,
    abandoned_ticks: AtomicU64,
    fetched: AtomicU64,
    delivered: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    notified: AtomicU64,
    lost: AtomicU64,
    last_batch_size: AtomicU64,
}

/// Point-in-time copy of [`DispatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub abandoned_ticks: u64,
    pub fetched: u64,
    pub delivered: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub notified: u64,
    pub lost: u64,
    /// Rows fetched by the most recent tick.
    pub last_batch_size: u64,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if report.abandoned {
            self.abandoned_ticks.fetch_add(1, Ordering::Relaxed);
        }
        self.fetched.fetch_add(report.fetched as u64, Ordering::Relaxed);
        self.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.requeued.fetch_add(report.requeued as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.notified.fetch_add(report.notified as u64, Ordering::Relaxed);
        self.lost.fetch_add(report.lost as u64, Ordering::Relaxed);
        self.last_batch_size.store(report.fetched as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            abandoned_ticks: self.abandoned_ticks.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            last_batch_size: self.last_batch_size.load(Ordering::Relaxed),
        }
    }
}
