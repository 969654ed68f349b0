//! Pruner: structural removal of empty leaves
//!
//! A leaf found empty under its latch is not removed on the spot: removal
//! rewrites ancestors, and ancestors must be latched before the leaf. The
//! compressor records how to find the leaf again, releases every latch, and
//! the pruner asks the tree to descend from the root and detach it.
//!
//! Between the release and the descent the leaf may be refilled or gain a
//! cursor. Both are expected: a refilled leaf is simply kept, and a cursor
//! means the record goes back on the queue.

use tracing::trace;

use crate::error::SweepResult;
use crate::latch::latches_held;
use crate::node::{Key, LeafKind, LeafNode};
use crate::queue::{CompactionQueue, CompactionRecord};
use crate::stats::RunCounters;
use crate::tracker::UtilizationTracker;
use crate::tree::{PruneOutcome, Tree};

/// How to reach an empty leaf from the root once its latch is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneTarget {
    id_key: Key,
    kind: LeafKind,
}

impl PruneTarget {
    /// Capture the navigation keys of `leaf`. The leaf must be latched.
    pub fn capture<L: LeafNode + ?Sized>(leaf: &L) -> Self {
        Self {
            id_key: leaf.identifier_key(),
            kind: leaf.kind(),
        }
    }

    /// Identifier key of the leaf.
    pub fn id_key(&self) -> &[u8] {
        &self.id_key
    }

    /// Plain or duplicate leaf.
    pub fn kind(&self) -> &LeafKind {
        &self.kind
    }
}

/// Hands empty leaves to the tree for removal.
pub struct Pruner<'a> {
    queue: &'a CompactionQueue,
}

impl<'a> Pruner<'a> {
    /// Pruner that requeues blocked records on `queue`.
    pub fn new(queue: &'a CompactionQueue) -> Self {
        Self { queue }
    }

    /// Remove the leaf described by `target` from `tree`.
    ///
    /// Returns true if the record was requeued because cursors were in the
    /// way. Structural errors from the tree propagate.
    pub fn prune<T: Tree>(
        &self,
        tree: &T,
        record: &CompactionRecord,
        target: &PruneTarget,
        run: &mut RunCounters,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<bool> {
        debug_assert_eq!(latches_held(), 0, "prune entered with latches held");

        let outcome = match &target.kind {
            LeafKind::Plain => tree.delete(&target.id_key, tracker)?,
            LeafKind::Duplicate { main_key } => {
                tree.delete_duplicate(main_key, &target.id_key, tracker)?
            }
        };

        match outcome {
            PruneOutcome::Removed => {
                run.processed += 1;
                trace!(node = %record.node_id(), database = %record.database_id(), "pruned empty leaf");
                Ok(false)
            }
            PruneOutcome::NotEmpty => {
                run.non_empty += 1;
                trace!(node = %record.node_id(), "leaf refilled before prune");
                Ok(false)
            }
            PruneOutcome::CursorsPresent => {
                self.queue.add_record(record.clone());
                run.cursors += 1;
                trace!(node = %record.node_id(), "prune blocked by cursors, requeued");
                Ok(true)
            }
        }
    }
}
