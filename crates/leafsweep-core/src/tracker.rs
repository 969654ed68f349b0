//! Obsolete-space accounting
//!
//! Every slot the compressor strips and every node the pruner detaches
//! leaves dead bytes behind in the log file it was last written to. Those
//! bytes are counted in a local `UtilizationTracker` while latches are held,
//! then handed to the store's `UtilizationSink` in one call per pass with no
//! latches held.

use std::collections::BTreeMap;

use crate::error::SweepResult;
use crate::node::FileId;

/// Obsolete space accumulated for one log file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackedFileSummary {
    /// File the obsolete entries live in
    pub file_id: FileId,
    /// Number of obsolete entries (slots or nodes)
    pub obsolete_count: u64,
    /// Total size of the obsolete entries in bytes
    pub obsolete_bytes: u64,
}

/// Per-file obsolete counts gathered while compressing.
#[derive(Debug, Default, Clone)]
pub struct UtilizationTracker {
    files: BTreeMap<FileId, TrackedFileSummary>,
}

impl UtilizationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one obsolete entry of `size` bytes in `file_id`.
    pub fn count_obsolete(&mut self, file_id: FileId, size: u64) {
        let summary = self.files.entry(file_id).or_insert(TrackedFileSummary {
            file_id,
            ..TrackedFileSummary::default()
        });
        summary.obsolete_count += 1;
        summary.obsolete_bytes += size;
    }

    /// True if nothing has been counted.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Summaries in file order.
    pub fn tracked_files(&self) -> Vec<TrackedFileSummary> {
        self.files.values().copied().collect()
    }

    /// Total obsolete bytes across all files.
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|s| s.obsolete_bytes).sum()
    }

    /// Total obsolete entries across all files.
    pub fn total_count(&self) -> u64 {
        self.files.values().map(|s| s.obsolete_count).sum()
    }

    /// Fold another tracker's counts into this one.
    pub fn merge(&mut self, other: &UtilizationTracker) {
        for summary in other.files.values() {
            let mine = self.files.entry(summary.file_id).or_insert(TrackedFileSummary {
                file_id: summary.file_id,
                ..TrackedFileSummary::default()
            });
            mine.obsolete_count += summary.obsolete_count;
            mine.obsolete_bytes += summary.obsolete_bytes;
        }
    }
}

/// The store-wide utilization profile. Receives one batch per pass.
///
/// Implementations may serialize internally; the compressor never calls
/// this while holding a latch.
pub trait UtilizationSink: Send + Sync {
    /// Record the obsolete space in `summaries`.
    fn count_and_log(&self, summaries: &[TrackedFileSummary]) -> SweepResult<()>;
}
