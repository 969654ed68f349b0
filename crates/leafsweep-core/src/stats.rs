//! Compressor run statistics
//!
//! A pass counts into a plain `RunCounters` it owns, and folds the totals
//! into the shared cumulative counters once, when it finishes. The lazy
//! counters are bumped directly by whichever thread compresses inline.

use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counts for one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCounters {
    /// Leaves that were no longer where the record said (split or removed)
    pub split: u64,
    /// Records whose database was closed or removed
    pub db_closed: u64,
    /// Records requeued because cursors were present
    pub cursors: u64,
    /// Prunes abandoned because the leaf had been refilled
    pub non_empty: u64,
    /// Leaves pruned from the tree
    pub processed: u64,
}

/// Snapshot of the compressor's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompressorStatsSnapshot {
    /// Cumulative split-away leaves
    pub split_bins: u64,
    /// Cumulative records dropped for closed databases
    pub db_closed_bins: u64,
    /// Cumulative cursor-blocked requeues
    pub cursors_bins: u64,
    /// Cumulative prunes abandoned on a refilled leaf
    pub non_empty_bins: u64,
    /// Cumulative leaves pruned
    pub processed_bins: u64,
    /// Leaves compressed inline
    pub lazy_processed: u64,
    /// Inline compressions that left an empty leaf for the daemon to prune
    pub lazy_empty: u64,
    /// Inline compressions that left relocated keys for the daemon
    pub lazy_split: u64,
    /// Daemon wake-ups (timer or explicit)
    pub woken_up: u64,
    /// Records waiting in the queue when the snapshot was taken
    pub queue_size: usize,
}

/// Cumulative counters shared by the daemon and lazy compressors.
#[derive(Debug, Default)]
pub struct CompressorStats {
    split_bins: AtomicU64,
    db_closed_bins: AtomicU64,
    cursors_bins: AtomicU64,
    non_empty_bins: AtomicU64,
    processed_bins: AtomicU64,
    lazy_processed: AtomicU64,
    lazy_empty: AtomicU64,
    lazy_split: AtomicU64,
    woken_up: AtomicU64,
}

impl CompressorStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one pass's counts into the cumulative totals.
    pub fn accumulate(&self, run: &RunCounters) {
        self.split_bins.fetch_add(run.split, Ordering::Relaxed);
        self.db_closed_bins.fetch_add(run.db_closed, Ordering::Relaxed);
        self.cursors_bins.fetch_add(run.cursors, Ordering::Relaxed);
        self.non_empty_bins.fetch_add(run.non_empty, Ordering::Relaxed);
        self.processed_bins.fetch_add(run.processed, Ordering::Relaxed);
    }

    pub(crate) fn record_lazy_processed(&self) {
        self.lazy_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lazy_empty(&self) {
        self.lazy_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lazy_split(&self) {
        self.lazy_split.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wakeup(&self) {
        self.woken_up.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals. With `clear`, every counter is reset to zero as it
    /// is read.
    pub fn snapshot(&self, queue_size: usize, clear: bool) -> CompressorStatsSnapshot {
        let read = |counter: &AtomicU64| {
            if clear {
                counter.swap(0, Ordering::Relaxed)
            } else {
                counter.load(Ordering::Relaxed)
            }
        };
        CompressorStatsSnapshot {
            split_bins: read(&self.split_bins),
            db_closed_bins: read(&self.db_closed_bins),
            cursors_bins: read(&self.cursors_bins),
            non_empty_bins: read(&self.non_empty_bins),
            processed_bins: read(&self.processed_bins),
            lazy_processed: read(&self.lazy_processed),
            lazy_empty: read(&self.lazy_empty),
            lazy_split: read(&self.lazy_split),
            woken_up: read(&self.woken_up),
            queue_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_runs() {
        let stats = CompressorStats::new();
        stats.accumulate(&RunCounters {
            split: 1,
            processed: 2,
            ..RunCounters::default()
        });
        stats.accumulate(&RunCounters {
            cursors: 3,
            processed: 1,
            ..RunCounters::default()
        });

        let snap = stats.snapshot(4, false);
        assert_eq!(snap.split_bins, 1);
        assert_eq!(snap.cursors_bins, 3);
        assert_eq!(snap.processed_bins, 3);
        assert_eq!(snap.queue_size, 4);
    }

    #[test]
    fn test_snapshot_clear() {
        let stats = CompressorStats::new();
        stats.record_lazy_processed();
        stats.record_lazy_empty();
        stats.record_wakeup();

        let first = stats.snapshot(0, true);
        assert_eq!(first.lazy_processed, 1);
        assert_eq!(first.lazy_empty, 1);
        assert_eq!(first.woken_up, 1);

        let second = stats.snapshot(0, false);
        assert_eq!(second, CompressorStatsSnapshot::default());
    }
}
