//! Compressor: strips deleted slots and hands empty leaves to the pruner
//!
//! Two entry points share the stripping logic:
//!
//! - `run_pass` takes a snapshot of the queue and, record by record,
//!   re-finds each leaf from the root, strips it under its latch, prunes it
//!   if it ended up empty, and follows any deleted key that a split moved to
//!   another leaf.
//! - `try_compress_inline` is called by a thread that already holds a leaf
//!   latched. It strips what it can without descending and leaves the rest
//!   (relocated keys, pruning) to the next pass.
//!
//! Every record ends up dropped, requeued, or reconciled. Only latch misuse
//! and tree corruption leave a pass as errors.

use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{SweepError, SweepResult};
use crate::latch::latches_held;
use crate::node::{DatabaseId, LeafNode, Latched, NodeId};
use crate::pruner::{PruneTarget, Pruner};
use crate::queue::{CompactionQueue, CompactionRecord};
use crate::stats::{CompressorStats, CompressorStatsSnapshot, RunCounters};
use crate::tracker::UtilizationTracker;
use crate::tree::{EnvLeaf, Environment, SlotTarget, Tree};

/// What one background pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Records taken from the queue
    pub records: usize,
    /// Outcome counts for those records
    pub counters: RunCounters,
    /// Obsolete bytes reported to the utilization sink
    pub obsolete_bytes: u64,
}

/// Result of an inline compression attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyOutcome {
    /// Leaf not compressible, or cursors present
    Skipped,
    /// No record with deleted keys was queued for the leaf
    NothingQueued,
    /// Every queued key was resolved and the leaf still has entries
    Compressed,
    /// Some keys were not in the leaf; the record went back on the queue
    Relocated,
    /// The leaf is now empty; a prune marker went back on the queue
    QueuedForPrune,
}

/// The compaction engine for one environment.
pub struct Compressor<E: Environment> {
    env: Arc<E>,
    queue: Arc<CompactionQueue>,
    stats: CompressorStats,
    pass_lock: Mutex<()>,
}

impl<E: Environment> Compressor<E> {
    /// Compressor working `queue` against the trees of `env`.
    pub fn new(env: Arc<E>, queue: Arc<CompactionQueue>) -> Self {
        Self {
            env,
            queue,
            stats: CompressorStats::new(),
            pass_lock: Mutex::new(()),
        }
    }

    /// The environment this compressor serves.
    pub fn env(&self) -> &Arc<E> {
        &self.env
    }

    /// The queue this compressor drains.
    pub fn queue(&self) -> &Arc<CompactionQueue> {
        &self.queue
    }

    /// Note that `key` was logically deleted from `leaf`. The leaf may be
    /// latched by the caller.
    pub fn enqueue_deleted_key<L: LeafNode + ?Sized>(&self, leaf: &L, key: &[u8]) {
        self.queue.add_deleted_key(leaf, key);
    }

    /// Ask the next pass to prune `leaf` if it is empty.
    pub fn enqueue_empty_candidate<L: LeafNode + ?Sized>(&self, leaf: &L) {
        self.queue.add_empty_candidate(leaf);
    }

    /// Records waiting for the next pass.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Cumulative counters.
    pub fn stats(&self) -> CompressorStatsSnapshot {
        self.stats.snapshot(self.queue.len(), false)
    }

    /// Cumulative counters, reset to zero when `clear` is set.
    pub fn stats_snapshot(&self, clear: bool) -> CompressorStatsSnapshot {
        self.stats.snapshot(self.queue.len(), clear)
    }

    pub(crate) fn note_wakeup(&self) {
        self.stats.record_wakeup();
    }

    /// Process everything queued so far.
    ///
    /// Concurrent callers are serialized. Records queued while the pass runs
    /// wait for the next one. If the environment closes mid-pass the rest
    /// of the snapshot is discarded.
    pub fn run_pass(&self) -> SweepResult<PassSummary> {
        let _pass = self.pass_lock.lock();
        if self.env.is_closed() {
            return Ok(PassSummary::default());
        }

        let snapshot = self.queue.drain_snapshot();
        if snapshot.is_empty() {
            return Ok(PassSummary::default());
        }
        debug_assert_eq!(latches_held(), 0, "pass started with latches held");

        let started = Instant::now();
        let records = snapshot.len();
        let mut run = RunCounters::default();
        let mut tracker = UtilizationTracker::new();

        let result = self.process_snapshot(snapshot, &mut run, &mut tracker);
        self.stats.accumulate(&run);
        debug_assert_eq!(latches_held(), 0, "pass finished with latches held");

        // Space already reclaimed is reported even if the pass failed.
        let obsolete_bytes = tracker.total_bytes();
        let reported = if tracker.is_empty() {
            Ok(())
        } else {
            self.env.utilization().count_and_log(&tracker.tracked_files())
        };
        result?;
        reported?;

        debug!(
            records,
            processed = run.processed,
            split = run.split,
            cursors = run.cursors,
            non_empty = run.non_empty,
            db_closed = run.db_closed,
            obsolete_bytes,
            elapsed_us = started.elapsed().as_micros() as u64,
            "compressor pass complete"
        );

        Ok(PassSummary {
            records,
            counters: run,
            obsolete_bytes,
        })
    }

    fn process_snapshot(
        &self,
        snapshot: HashMap<NodeId, CompactionRecord>,
        run: &mut RunCounters,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<()> {
        let mut databases: HashMap<DatabaseId, Option<Arc<E::Tree>>> = HashMap::new();
        let total = snapshot.len();

        for (done, (_, record)) in snapshot.into_iter().enumerate() {
            if self.env.is_closed() {
                debug!(discarded = total - done, "environment closed mid-pass");
                return Ok(());
            }

            let database_id = record.database_id();
            let tree = databases
                .entry(database_id)
                .or_insert_with(|| self.env.database(database_id))
                .clone();
            let Some(tree) = tree else {
                run.db_closed += 1;
                trace!(node = %record.node_id(), database = %database_id, "database closed, record dropped");
                continue;
            };

            self.process_record(&tree, record, run, tracker)?;
        }
        Ok(())
    }

    fn process_record(
        &self,
        tree: &E::Tree,
        mut record: CompactionRecord,
        run: &mut RunCounters,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<()> {
        let Some(leaf) = self.search_for_leaf(tree, record.main_key(), record.dup_key())? else {
            run.split += 1;
            trace!(node = %record.node_id(), "leaf not found, record dropped");
            return Ok(());
        };
        if leaf.node_id() != record.node_id() {
            leaf.latch().release()?;
            run.split += 1;
            trace!(node = %record.node_id(), found = %leaf.node_id(), "leaf split away, record dropped");
            return Ok(());
        }

        let requeued = self.compress_leaf(tree, &leaf, &mut record, run, tracker)?;
        if !requeued && record.has_deleted_keys() {
            self.check_for_relocated_slots(tree, &record, run, tracker)?;
        }
        Ok(())
    }

    /// Find the leaf holding `main_key`, or for a duplicate record the leaf
    /// holding `dup_key` in the subtree under `main_key`. Returned latched.
    fn search_for_leaf(
        &self,
        tree: &E::Tree,
        main_key: &[u8],
        dup_key: Option<&[u8]>,
    ) -> SweepResult<Option<Arc<EnvLeaf<E>>>> {
        let Some(leaf) = tree.search(main_key)? else {
            return Ok(None);
        };
        let Some(dup_key) = dup_key else {
            return Ok(Some(leaf));
        };

        let target = match tree.duplicate_root(&leaf, main_key) {
            Ok(target) => target,
            Err(err) => {
                leaf.latch().release_if_owner();
                return Err(err);
            }
        };
        match target {
            SlotTarget::Missing => {
                leaf.latch().release()?;
                Ok(None)
            }
            SlotTarget::Plain => Ok(Some(leaf)),
            SlotTarget::Duplicates(root) => {
                leaf.latch().release()?;
                tree.search_subtree(root, dup_key)
            }
        }
    }

    /// Strip `leaf`, entered latched. The latch is released before
    /// returning and before any prune. Returns true if the whole record was
    /// requeued because of cursors.
    fn compress_leaf(
        &self,
        tree: &E::Tree,
        leaf: &EnvLeaf<E>,
        record: &mut CompactionRecord,
        run: &mut RunCounters,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<bool> {
        let latched = self.compress_latched(leaf, record, run, tracker);
        let prune = match latched {
            Ok(prune) => prune,
            Err(err) => {
                leaf.latch().release_if_owner();
                return Err(err);
            }
        };
        leaf.latch().release()?;

        match prune {
            LatchedOutcome::Requeued => Ok(true),
            LatchedOutcome::Kept => Ok(false),
            LatchedOutcome::Empty(target) => {
                Pruner::new(&self.queue).prune(tree, &record.prune_marker(), &target, run, tracker)?;
                Ok(false)
            }
        }
    }

    fn compress_latched(
        &self,
        leaf: &EnvLeaf<E>,
        record: &mut CompactionRecord,
        run: &mut RunCounters,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<LatchedOutcome> {
        if leaf.resident_cursor_count() > 0 {
            self.queue.add_record(record.clone());
            run.cursors += 1;
            trace!(node = %leaf.node_id(), "cursors present, record requeued");
            return Ok(LatchedOutcome::Requeued);
        }

        leaf.strip_deleted_slots(record, tracker)?;
        if leaf.live_entry_count() == 0 {
            Ok(LatchedOutcome::Empty(PruneTarget::capture(leaf)))
        } else {
            Ok(LatchedOutcome::Kept)
        }
    }

    /// Follow each key the leaf no longer held to wherever it lives now.
    fn check_for_relocated_slots(
        &self,
        tree: &E::Tree,
        record: &CompactionRecord,
        run: &mut RunCounters,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<()> {
        for key in record.deleted_keys() {
            let found = match record.dup_key() {
                Some(_) => self.search_for_leaf(tree, record.main_key(), Some(key))?,
                None => self.search_for_leaf(tree, key, None)?,
            };
            let Some(leaf) = found else {
                continue;
            };

            let mut relocated = CompactionRecord::for_leaf(&*leaf);
            relocated.add_deleted_key(key.clone());
            trace!(from = %record.node_id(), to = %leaf.node_id(), "following relocated key");
            self.compress_leaf(tree, &leaf, &mut relocated, run, tracker)?;
        }
        Ok(())
    }

    /// Strip `leaf` inline. The caller must hold the leaf's latch
    /// exclusively and keeps it; nothing here descends the tree.
    ///
    /// Obsolete space is counted in the caller's `tracker`.
    pub fn try_compress_inline<L: LeafNode + ?Sized>(
        &self,
        leaf: &L,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<LazyOutcome> {
        if !leaf.is_compressible() {
            return Ok(LazyOutcome::Skipped);
        }
        if !leaf.latch().is_write_locked_by_current_thread() {
            return Err(SweepError::LatchNotHeld {
                name: leaf.latch().name().to_string(),
            });
        }
        if leaf.resident_cursor_count() > 0 {
            return Ok(LazyOutcome::Skipped);
        }
        let Some(mut record) = self.queue.remove_compressible(leaf.node_id()) else {
            return Ok(LazyOutcome::NothingQueued);
        };

        if let Err(err) = leaf.strip_deleted_slots(&mut record, tracker) {
            self.queue.add_record(record);
            return Err(err);
        }
        self.stats.record_lazy_processed();

        if record.has_deleted_keys() {
            self.queue.add_record(record);
            self.stats.record_lazy_split();
            return Ok(LazyOutcome::Relocated);
        }
        if leaf.live_entry_count() == 0 {
            self.queue.add_record(record);
            self.stats.record_lazy_empty();
            return Ok(LazyOutcome::QueuedForPrune);
        }
        Ok(LazyOutcome::Compressed)
    }
}

enum LatchedOutcome {
    Requeued,
    Kept,
    Empty(PruneTarget),
}
