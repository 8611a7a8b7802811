//! Per-queue statistics
//!
//! Counters are updated with relaxed atomics on the hot path and read without
//! locking; a snapshot is therefore internally consistent per counter, not
//! across counters.

use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Live counters owned by one queue.
pub(crate) struct QueueStats {
    enqueued: AtomicU64,
    completed: AtomicU64,
    errored: AtomicU64,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    blocked_ns: AtomicU64,
}

impl QueueStats {
    pub(crate) fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            blocked_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr_depth(&self) {
        // saturating: a terminated task may be discarded more than once
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub(crate) fn add_blocked(&self, idle: Duration) {
        self.blocked_ns
            .fetch_add(idle.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStatistics {
        self.snapshot_with_depth(self.depth())
    }

    /// Snapshot with an externally tracked depth (shared I/O queues measure
    /// depth off their injector).
    pub(crate) fn snapshot_with_depth(&self, depth: usize) -> QueueStatistics {
        QueueStatistics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            depth,
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
            blocked_time: Duration::from_nanos(self.blocked_ns.load(Ordering::Relaxed)),
        }
    }

    pub(crate) fn reset(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.errored.store(0, Ordering::Relaxed);
        self.peak_depth.store(0, Ordering::Relaxed);
        self.blocked_ns.store(0, Ordering::Relaxed);
        // depth tracks live queue contents and is not reset
    }
}

/// Point-in-time view of one queue's counters, or the sum over several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatistics {
    /// Tasks posted to the queue.
    pub enqueued: u64,
    /// Tasks that ran to successful completion.
    pub completed: u64,
    /// Tasks that finished with a captured failure.
    pub errored: u64,
    /// Tasks currently assigned, including the running one.
    pub depth: usize,
    /// High-water mark of `depth`.
    pub peak_depth: usize,
    /// Cumulative time the worker spent idle waiting for work.
    pub blocked_time: Duration,
}

impl Add for QueueStatistics {
    type Output = QueueStatistics;

    fn add(self, rhs: QueueStatistics) -> QueueStatistics {
        QueueStatistics {
            enqueued: self.enqueued + rhs.enqueued,
            completed: self.completed + rhs.completed,
            errored: self.errored + rhs.errored,
            depth: self.depth + rhs.depth,
            peak_depth: self.peak_depth + rhs.peak_depth,
            blocked_time: self.blocked_time + rhs.blocked_time,
        }
    }
}

impl AddAssign for QueueStatistics {
    fn add_assign(&mut self, rhs: QueueStatistics) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_tracks_peak() {
        let stats = QueueStats::new();
        stats.record_enqueued();
        stats.record_enqueued();
        stats.record_enqueued();
        stats.decr_depth();

        let snap = stats.snapshot();
        assert_eq!(snap.enqueued, 3);
        assert_eq!(snap.depth, 2);
        assert_eq!(snap.peak_depth, 3);
    }

    #[test]
    fn test_decr_depth_saturates() {
        let stats = QueueStats::new();
        stats.decr_depth();
        assert_eq!(stats.depth(), 0);
    }

    #[test]
    fn test_reset_preserves_depth() {
        let stats = QueueStats::new();
        stats.record_enqueued();
        stats.record_completed();
        stats.add_blocked(Duration::from_millis(5));
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.enqueued, 0);
        assert_eq!(snap.completed, 0);
        assert_eq!(snap.blocked_time, Duration::ZERO);
        assert_eq!(snap.depth, 1);
    }

    #[test]
    fn test_aggregation() {
        let a = QueueStatistics {
            enqueued: 2,
            completed: 1,
            errored: 1,
            depth: 3,
            peak_depth: 4,
            blocked_time: Duration::from_millis(10),
        };
        let b = QueueStatistics {
            enqueued: 5,
            ..Default::default()
        };
        let sum = a + b;
        assert_eq!(sum.enqueued, 7);
        assert_eq!(sum.depth, 3);
        assert_eq!(sum.blocked_time, Duration::from_millis(10));
    }
}
