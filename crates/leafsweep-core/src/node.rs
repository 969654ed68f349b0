//! Node identities and the leaf-node contract
//!
//! The compressor never owns tree nodes. It sees them through `LeafNode`,
//! which the tree implementation provides, and always through a node that
//! the tree has already latched for exclusive access.

use std::fmt;

use crate::error::SweepResult;
use crate::shared_latch::SharedLatch;
use crate::queue::CompactionRecord;
use crate::tracker::UtilizationTracker;

/// Raw key bytes as stored in a slot.
pub type Key = Vec<u8>;

/// Process-unique tree node identifier. Never reused, even after the node
/// has been split away or pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Identifier of the database (table) that owns a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseId(pub u32);

/// Log file a slot or node was last written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FileId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Where a leaf sits in the tree.
///
/// A duplicate leaf lives in a secondary subtree rooted under one primary
/// key; reaching it takes a descent to the primary key followed by a
/// descent of the subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafKind {
    /// Ordinary leaf of the main tree
    Plain,
    /// Leaf of the duplicate subtree owned by `main_key`
    Duplicate {
        /// Primary key that roots the duplicate subtree
        main_key: Key,
    },
}

impl LeafKind {
    /// True for duplicate-subtree leaves.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LeafKind::Duplicate { .. })
    }
}

/// Anything guarded by a node latch.
pub trait Latched {
    /// The latch guarding this node.
    fn latch(&self) -> &SharedLatch;
}

/// A tree node as seen by the compressor.
///
/// Every method except `node_id`, `database_id` and `latch` must only be
/// called while the caller holds the node's latch exclusively.
pub trait LeafNode: Latched + Send + Sync {
    /// Stable identity of this node.
    fn node_id(&self) -> NodeId;

    /// Database that owns the tree this node belongs to.
    fn database_id(&self) -> DatabaseId;

    /// Number of cursors currently positioned on this node.
    fn resident_cursor_count(&self) -> usize;

    /// Number of slots in this node, deleted or not.
    fn live_entry_count(&self) -> usize;

    /// False for nodes that hold no compressible slots (internal nodes,
    /// duplicate roots).
    fn is_compressible(&self) -> bool;

    /// Key used to navigate from the root (or the duplicate root) back to
    /// this node.
    fn identifier_key(&self) -> Key;

    /// Plain or duplicate-subtree leaf.
    fn kind(&self) -> LeafKind;

    /// Remove every slot that is known deleted, consuming matching keys from
    /// `record`. Keys of the record that name no slot in this node are left
    /// in the record. Obsolete space is counted in `tracker`.
    ///
    /// Returns true when no deleted key of the record is left unresolved.
    fn strip_deleted_slots(
        &self,
        record: &mut CompactionRecord,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(NodeId(42).to_string(), "42");
        assert_eq!(DatabaseId(7).to_string(), "7");
        assert_eq!(FileId(0x1f).to_string(), "0x0000001f");
    }

    #[test]
    fn test_leaf_kind() {
        assert!(!LeafKind::Plain.is_duplicate());
        let dup = LeafKind::Duplicate { main_key: b"k".to_vec() };
        assert!(dup.is_duplicate());
    }
}
