//! In-memory tree nodes.
//!
//! Every node carries a `SharedLatch`: internal nodes allow shared access,
//! leaves are exclusive-only. The latch is the concurrency protocol; the
//! mutex around the body only gives interior mutability and is held for the
//! duration of one method call, never across a latch acquisition.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use leafsweep_core::{
    CompactionRecord, DatabaseId, FileId, Key, Latched, LeafKind, LeafNode, NodeId, SharedLatch,
    SweepResult, UtilizationTracker,
};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed per-slot bytes on top of key and value.
pub(crate) const SLOT_OVERHEAD: u64 = 16;

/// Logged size charged for every node.
pub(crate) const NODE_LOGGED_SIZE: u64 = 128;

fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
}

/// What a leaf slot holds.
pub(crate) enum SlotData {
    /// A record, possibly logically deleted
    Record { value: Vec<u8>, deleted: bool },
    /// Root of the duplicate subtree for this key
    Duplicates(Arc<MemNode>),
}

pub(crate) struct Slot {
    pub key: Key,
    pub data: SlotData,
    pub file_id: FileId,
    pub size: u64,
}

impl Slot {
    pub fn record(key: &[u8], value: &[u8], file_id: FileId) -> Self {
        Self {
            key: key.to_vec(),
            data: SlotData::Record {
                value: value.to_vec(),
                deleted: false,
            },
            file_id,
            size: SLOT_OVERHEAD + (key.len() + value.len()) as u64,
        }
    }

    pub fn duplicates(key: &[u8], root: Arc<MemNode>, file_id: FileId) -> Self {
        Self {
            key: key.to_vec(),
            data: SlotData::Duplicates(root),
            file_id,
            size: SLOT_OVERHEAD + key.len() as u64,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.data, SlotData::Record { deleted: true, .. })
    }

    /// Mark a live record deleted. False if there was none to delete.
    pub fn mark_deleted(&mut self) -> bool {
        if let SlotData::Record { deleted, .. } = &mut self.data {
            if !*deleted {
                *deleted = true;
                return true;
            }
        }
        false
    }

    pub fn live_value(&self) -> Option<&[u8]> {
        match &self.data {
            SlotData::Record { value, deleted: false } => Some(value.as_slice()),
            _ => None,
        }
    }
}

pub(crate) struct Child {
    pub key: Key,
    pub node: Arc<MemNode>,
}

pub(crate) struct LeafBody {
    pub id_key: Key,
    pub slots: Vec<Slot>,
    pub dup_main_key: Option<Key>,
}

impl LeafBody {
    pub fn empty(dup_main_key: Option<Key>) -> Self {
        Self {
            id_key: Vec::new(),
            slots: Vec::new(),
            dup_main_key,
        }
    }

    pub fn find(&self, key: &[u8]) -> Result<usize, usize> {
        self.slots.binary_search_by(|s| s.key.as_slice().cmp(key))
    }

    pub fn slot(&self, key: &[u8]) -> Option<&Slot> {
        self.find(key).ok().map(|i| &self.slots[i])
    }

    pub fn slot_mut(&mut self, key: &[u8]) -> Option<&mut Slot> {
        match self.find(key) {
            Ok(i) => Some(&mut self.slots[i]),
            Err(_) => None,
        }
    }

    /// Insert a slot that is not present yet.
    pub fn insert(&mut self, slot: Slot) {
        if self.slots.is_empty() {
            self.id_key = slot.key.clone();
        }
        let at = self.find(&slot.key).unwrap_or_else(|i| i);
        self.slots.insert(at, slot);
    }

    /// Remove the slot for `key`, moving the identifier key to the new
    /// first slot if it was the one removed.
    pub fn remove(&mut self, key: &[u8]) -> Option<Slot> {
        let i = self.find(key).ok()?;
        let slot = self.slots.remove(i);
        if slot.key == self.id_key {
            self.reset_id_key();
        }
        Some(slot)
    }

    fn reset_id_key(&mut self) {
        if let Some(first) = self.slots.first() {
            self.id_key = first.key.clone();
        }
    }
}

pub(crate) enum NodeBody {
    Internal(Vec<Child>),
    Leaf(LeafBody),
}

/// Index of the child covering `key`: the last child whose key is <= `key`.
/// The first child also covers everything below its own key.
pub(crate) fn child_index(children: &[Child], key: &[u8]) -> usize {
    children
        .partition_point(|c| c.key.as_slice() <= key)
        .saturating_sub(1)
}

/// A node of an in-memory tree.
pub struct MemNode {
    id: NodeId,
    database_id: DatabaseId,
    is_leaf: bool,
    latch: SharedLatch,
    body: Mutex<NodeBody>,
    cursors: AtomicUsize,
    file_id: FileId,
}

impl MemNode {
    pub(crate) fn new_internal(database_id: DatabaseId, children: Vec<Child>, file_id: FileId) -> Arc<Self> {
        let id = next_node_id();
        Arc::new(Self {
            id,
            database_id,
            is_leaf: false,
            latch: SharedLatch::new(format!("IN-{}", id)),
            body: Mutex::new(NodeBody::Internal(children)),
            cursors: AtomicUsize::new(0),
            file_id,
        })
    }

    pub(crate) fn new_leaf(database_id: DatabaseId, body: LeafBody, file_id: FileId) -> Arc<Self> {
        let id = next_node_id();
        Arc::new(Self {
            id,
            database_id,
            is_leaf: true,
            latch: SharedLatch::exclusive_only(format!("BIN-{}", id)),
            body: Mutex::new(NodeBody::Leaf(body)),
            cursors: AtomicUsize::new(0),
            file_id,
        })
    }

    /// Stable identity of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// True for leaves.
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Cursors currently pinned to this node.
    pub fn cursor_count(&self) -> usize {
        self.cursors.load(Ordering::Acquire)
    }

    pub(crate) fn pin(&self) {
        self.cursors.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        self.cursors.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn body(&self) -> MutexGuard<'_, NodeBody> {
        self.body.lock()
    }

    /// Child covering `key`, `None` for a leaf or an empty internal node.
    pub(crate) fn child_for(&self, key: &[u8]) -> Option<Arc<MemNode>> {
        match &*self.body() {
            NodeBody::Internal(children) if !children.is_empty() => {
                Some(Arc::clone(&children[child_index(children, key)].node))
            }
            _ => None,
        }
    }

    /// Children of an internal node, roots of duplicate subtrees for a leaf.
    pub(crate) fn descendants(&self) -> Vec<Arc<MemNode>> {
        match &*self.body() {
            NodeBody::Internal(children) => children.iter().map(|c| Arc::clone(&c.node)).collect(),
            NodeBody::Leaf(leaf) => leaf
                .slots
                .iter()
                .filter_map(|s| match &s.data {
                    SlotData::Duplicates(root) => Some(Arc::clone(root)),
                    SlotData::Record { .. } => None,
                })
                .collect(),
        }
    }

    /// Children of an internal node, slots of a leaf.
    pub(crate) fn entry_count(&self) -> usize {
        match &*self.body() {
            NodeBody::Internal(children) => children.len(),
            NodeBody::Leaf(leaf) => leaf.slots.len(),
        }
    }

    /// Detach `child` from this internal node. False if it is not a child.
    pub(crate) fn remove_child(&self, child: &Arc<MemNode>) -> bool {
        match &mut *self.body() {
            NodeBody::Internal(children) => {
                match children.iter().position(|c| Arc::ptr_eq(&c.node, child)) {
                    Some(i) => {
                        children.remove(i);
                        true
                    }
                    None => false,
                }
            }
            NodeBody::Leaf(_) => false,
        }
    }

    pub(crate) fn count_obsolete(&self, tracker: &mut UtilizationTracker) {
        tracker.count_obsolete(self.file_id, NODE_LOGGED_SIZE);
    }
}

impl fmt::Debug for MemNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemNode")
            .field("id", &self.id)
            .field("database", &self.database_id)
            .field("leaf", &self.is_leaf)
            .field("cursors", &self.cursor_count())
            .finish()
    }
}

impl Latched for MemNode {
    fn latch(&self) -> &SharedLatch {
        &self.latch
    }
}

impl LeafNode for MemNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn resident_cursor_count(&self) -> usize {
        self.cursor_count()
    }

    fn live_entry_count(&self) -> usize {
        self.entry_count()
    }

    fn is_compressible(&self) -> bool {
        self.is_leaf
    }

    fn identifier_key(&self) -> Key {
        match &*self.body() {
            NodeBody::Leaf(leaf) => leaf.id_key.clone(),
            NodeBody::Internal(children) => children.first().map(|c| c.key.clone()).unwrap_or_default(),
        }
    }

    fn kind(&self) -> LeafKind {
        match &*self.body() {
            NodeBody::Leaf(LeafBody {
                dup_main_key: Some(main_key),
                ..
            }) => LeafKind::Duplicate {
                main_key: main_key.clone(),
            },
            _ => LeafKind::Plain,
        }
    }

    fn strip_deleted_slots(
        &self,
        record: &mut CompactionRecord,
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<bool> {
        let mut body = self.body();
        let NodeBody::Leaf(leaf) = &mut *body else {
            return Ok(!record.has_deleted_keys());
        };

        let id_key = leaf.id_key.clone();
        let mut id_removed = false;
        leaf.slots.retain(|slot| {
            // A listed key whose slot is live again needs no follow-up.
            record.remove_deleted_key(&slot.key);
            if !slot.is_deleted() {
                return true;
            }
            tracker.count_obsolete(slot.file_id, slot.size);
            if slot.key == id_key {
                id_removed = true;
            }
            false
        });
        if id_removed {
            leaf.reset_id_key();
        }
        Ok(!record.has_deleted_keys())
    }
}
