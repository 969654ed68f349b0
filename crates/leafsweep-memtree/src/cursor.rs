//! Cursors that pin leaves.
//!
//! A cursor does not hold a latch between calls. It keeps a count on every
//! leaf it is positioned on instead, and the compressor leaves such leaves
//! alone: no slot is stripped and no node is detached while the count is
//! non-zero. Dropping the cursor takes the counts back.

use std::sync::Arc;

use leafsweep_core::{Key, Latched, NodeId, SlotTarget, SweepResult, Tree};

use crate::node::{MemNode, NodeBody};
use crate::tree::MemTree;

/// Cursor positioned on one key, or on one duplicate of a key.
pub struct MemCursor {
    pinned: Vec<Arc<MemNode>>,
    key: Key,
}

impl MemCursor {
    fn new(key: &[u8]) -> Self {
        Self {
            pinned: Vec::with_capacity(2),
            key: key.to_vec(),
        }
    }

    fn pin(&mut self, node: &Arc<MemNode>) {
        node.pin();
        self.pinned.push(Arc::clone(node));
    }

    /// Key the cursor was opened on.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Leaves held by this cursor, outermost first.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.pinned.iter().map(|n| n.id()).collect()
    }

    /// Current value at the cursor position, `None` once it was deleted.
    pub fn value(&self) -> Option<Vec<u8>> {
        let leaf = self.pinned.last()?;
        leaf.latch().acquire_exclusive().ok()?;
        let value = match &*leaf.body() {
            NodeBody::Leaf(body) => body
                .slot(&self.key)
                .and_then(|s| s.live_value())
                .map(|v| v.to_vec()),
            NodeBody::Internal(_) => None,
        };
        leaf.latch().release_if_owner();
        value
    }
}

impl Drop for MemCursor {
    fn drop(&mut self) {
        for node in self.pinned.drain(..) {
            node.unpin();
        }
    }
}

impl std::fmt::Debug for MemCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCursor")
            .field("key", &self.key)
            .field("nodes", &self.node_ids())
            .finish()
    }
}

impl MemTree {
    /// Open a cursor on the leaf covering `key`. `None` if the tree is empty.
    pub fn open_cursor(&self, key: &[u8]) -> SweepResult<Option<MemCursor>> {
        let Some(leaf) = self.search(key)? else {
            return Ok(None);
        };
        let mut cursor = MemCursor::new(key);
        cursor.pin(&leaf);
        leaf.latch().release()?;
        Ok(Some(cursor))
    }

    /// Open a cursor on duplicate `dup` of `key`. The cursor pins the leaf
    /// holding `key` as well as the duplicate leaf. `None` unless `key`
    /// owns a duplicate subtree.
    pub fn open_duplicate_cursor(&self, key: &[u8], dup: &[u8]) -> SweepResult<Option<MemCursor>> {
        let Some(leaf) = self.search(key)? else {
            return Ok(None);
        };
        let mut cursor = MemCursor::new(dup);
        cursor.pin(&leaf);

        let target = self.duplicate_root(&leaf, key);
        leaf.latch().release()?;
        let SlotTarget::Duplicates(root) = target? else {
            return Ok(None);
        };

        let Some(dup_leaf) = self.search_subtree(root, dup)? else {
            return Ok(None);
        };
        cursor.pin(&dup_leaf);
        dup_leaf.latch().release()?;
        Ok(Some(cursor))
    }
}
