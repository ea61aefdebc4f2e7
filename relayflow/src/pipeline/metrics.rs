//! Run counters kept by the engine.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters accumulated over one forwarder run. Shared between the
/// facade and the router, read through [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub(crate) struct ForwarderMetrics {
    /// Messages accepted by the intake.
    produced: AtomicU64,
    /// Messages that reached the end of the pipeline.
    delivered: AtomicU64,
    /// Messages that ended in a failure report.
    failed: AtomicU64,
    /// Retry attempts scheduled.
    retried: AtomicU64,
    /// Injections turned away at the intake.
    rejected: AtomicU64,
}

impl ForwarderMetrics {
    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            produced: self.produced.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Messages accepted for processing.
    pub produced: u64,
    /// Messages that traversed the whole pipeline.
    pub delivered: u64,
    /// Messages that ended in a failure report.
    pub failed: u64,
    /// Retry attempts scheduled.
    pub retried: u64,
    /// Injections rejected at the intake.
    pub rejected: u64,
}

impl MetricsSnapshot {
    /// Messages with a terminal outcome so far.
    #[must_use]
    pub fn terminal(&self) -> u64 {
        self.delivered + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = ForwarderMetrics::default();
        metrics.record_produced();
        metrics.record_produced();
        metrics.record_delivered();
        metrics.record_retried();
        metrics.record_failed();
        metrics.record_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.produced, 2);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.terminal(), 2);
    }

    #[test]
    fn test_snapshot_starts_at_zero() {
        let snapshot = ForwarderMetrics::default().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.terminal(), 0);
    }
}
