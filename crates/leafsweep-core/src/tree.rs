//! Collaborator contracts: the environment and its trees
//!
//! The compressor does not search, split or delete on its own. It drives a
//! `Tree` through these calls, all of which follow the same latch rules:
//! a search returns its leaf latched exclusively, and the caller releases
//! it; a structural delete is entered with no latches held.

use std::sync::Arc;

use crate::error::{SweepError, SweepResult};
use crate::node::{DatabaseId, Latched, LeafNode};
use crate::tracker::{UtilizationSink, UtilizationTracker};

/// What a leaf slot for a primary key points at.
#[derive(Debug)]
pub enum SlotTarget<R> {
    /// No live slot for the key
    Missing,
    /// An ordinary record; the leaf itself is the answer
    Plain,
    /// Root of a duplicate subtree, returned latched
    Duplicates(R),
}

/// Result of a structural delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    /// The leaf and any emptied ancestors were detached
    Removed,
    /// The leaf gained entries since it was found empty
    NotEmpty,
    /// A cursor sits on the leaf or on a node the delete would remove
    CursorsPresent,
}

/// One database's B-tree.
pub trait Tree: Send + Sync {
    /// Leaf node type.
    type Leaf: LeafNode;
    /// Duplicate subtree root type.
    type DupRoot: Latched + Send + Sync;

    /// Database this tree belongs to.
    fn database_id(&self) -> DatabaseId;

    /// Descend from the root to the leaf covering `key` and return it
    /// latched exclusively. `None` if the tree is empty.
    fn search(&self, key: &[u8]) -> SweepResult<Option<Arc<Self::Leaf>>>;

    /// With `leaf` latched, look at its slot for `main_key`. A duplicate
    /// root is latched before it is returned; `leaf` stays latched.
    fn duplicate_root(
        &self,
        leaf: &Self::Leaf,
        main_key: &[u8],
    ) -> SweepResult<SlotTarget<Arc<Self::DupRoot>>>;

    /// Descend from a latched duplicate root to the leaf covering
    /// `dup_key`, returned latched. The root latch is released, on error
    /// as well.
    fn search_subtree(
        &self,
        root: Arc<Self::DupRoot>,
        dup_key: &[u8],
    ) -> SweepResult<Option<Arc<Self::Leaf>>>;

    /// Detach the empty leaf identified by `id_key` and every ancestor left
    /// without children. Entered with no latches held.
    fn delete(&self, id_key: &[u8], tracker: &mut UtilizationTracker) -> SweepResult<PruneOutcome>;

    /// Detach the empty duplicate leaf identified by `id_key` inside the
    /// subtree owned by `main_key`. Entered with no latches held.
    fn delete_duplicate(
        &self,
        main_key: &[u8],
        id_key: &[u8],
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<PruneOutcome>;
}

/// The store the compressor works for.
pub trait Environment: Send + Sync {
    /// Tree type of every database in the store.
    type Tree: Tree;

    /// True once the store has been closed; passes stop between records.
    fn is_closed(&self) -> bool;

    /// Open database by id, `None` if it was closed or removed.
    fn database(&self, id: DatabaseId) -> Option<Arc<Self::Tree>>;

    /// The store-wide utilization profile.
    fn utilization(&self) -> &dyn UtilizationSink;

    /// Mark the store unusable after a fatal error.
    fn invalidate(&self, cause: &SweepError);
}

/// Leaf type reachable through an environment.
pub type EnvLeaf<E> = <<E as Environment>::Tree as Tree>::Leaf;
