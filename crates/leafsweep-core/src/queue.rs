//! Compaction queue: pending work per leaf
//!
//! Writers that logically delete a slot record the key here against the
//! leaf's node id. A pass takes the whole map at once and works on that
//! private snapshot while writers keep filling a fresh map.
//!
//! The queue lock only ever guards O(1) map work and is never taken while
//! the caller expects to acquire a node latch, so queue bookkeeping and tree
//! traversal cannot wait on each other.

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::node::{DatabaseId, Key, LeafKind, LeafNode, NodeId};

/// Pending compaction work for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionRecord {
    node_id: NodeId,
    database_id: DatabaseId,
    main_key: Key,
    dup_key: Option<Key>,
    deleted_keys: HashSet<Key>,
}

impl CompactionRecord {
    /// Record for a leaf of the main tree, located by `id_key`.
    pub fn plain(node_id: NodeId, database_id: DatabaseId, id_key: Key) -> Self {
        Self {
            node_id,
            database_id,
            main_key: id_key,
            dup_key: None,
            deleted_keys: HashSet::new(),
        }
    }

    /// Record for a duplicate-subtree leaf: `main_key` reaches the subtree,
    /// `dup_key` reaches the leaf inside it.
    pub fn duplicate(node_id: NodeId, database_id: DatabaseId, main_key: Key, dup_key: Key) -> Self {
        Self {
            node_id,
            database_id,
            main_key,
            dup_key: Some(dup_key),
            deleted_keys: HashSet::new(),
        }
    }

    /// Record addressing `leaf` as it looks now. The leaf must be latched.
    pub fn for_leaf<L: LeafNode + ?Sized>(leaf: &L) -> Self {
        match leaf.kind() {
            LeafKind::Plain => Self::plain(leaf.node_id(), leaf.database_id(), leaf.identifier_key()),
            LeafKind::Duplicate { main_key } => Self::duplicate(
                leaf.node_id(),
                leaf.database_id(),
                main_key,
                leaf.identifier_key(),
            ),
        }
    }

    /// Target leaf.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Database owning the target leaf.
    pub fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    /// Key descended from the root.
    pub fn main_key(&self) -> &[u8] {
        &self.main_key
    }

    /// Key descended from the duplicate root, for duplicate leaves.
    pub fn dup_key(&self) -> Option<&[u8]> {
        self.dup_key.as_deref()
    }

    /// True if the record addresses a duplicate-subtree leaf.
    pub fn is_duplicate(&self) -> bool {
        self.dup_key.is_some()
    }

    /// Add one deleted key.
    pub fn add_deleted_key(&mut self, key: Key) {
        self.deleted_keys.insert(key);
    }

    /// Union another record's deleted keys into this one.
    pub fn merge_deleted_keys(&mut self, other: CompactionRecord) {
        self.deleted_keys.extend(other.deleted_keys);
    }

    /// Drop a key once its slot has been dealt with.
    pub fn remove_deleted_key(&mut self, key: &[u8]) -> bool {
        self.deleted_keys.remove(key)
    }

    /// True if `key` is still pending.
    pub fn has_deleted_key(&self, key: &[u8]) -> bool {
        self.deleted_keys.contains(key)
    }

    /// True if any deleted key is still pending. A record without keys is
    /// a request to check the leaf for emptiness and prune it.
    pub fn has_deleted_keys(&self) -> bool {
        !self.deleted_keys.is_empty()
    }

    /// Pending deleted keys, in no particular order.
    pub fn deleted_keys(&self) -> impl Iterator<Item = &Key> {
        self.deleted_keys.iter()
    }

    /// Number of pending deleted keys.
    pub fn deleted_key_count(&self) -> usize {
        self.deleted_keys.len()
    }

    /// Copy of this record's addressing with no deleted keys.
    pub fn prune_marker(&self) -> Self {
        Self {
            node_id: self.node_id,
            database_id: self.database_id,
            main_key: self.main_key.clone(),
            dup_key: self.dup_key.clone(),
            deleted_keys: HashSet::new(),
        }
    }

    /// Move the pending keys out, leaving the record empty.
    pub fn take_deleted_keys(&mut self) -> Vec<Key> {
        self.deleted_keys.drain().collect()
    }
}

/// Map from leaf id to its single pending record.
pub struct CompactionQueue {
    records: Mutex<HashMap<NodeId, CompactionRecord>>,
}

impl CompactionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Note that `key` was deleted from `leaf`.
    ///
    /// Safe to call with the leaf latched; the record is only built from the
    /// leaf when none is queued yet.
    pub fn add_deleted_key<L: LeafNode + ?Sized>(&self, leaf: &L, key: &[u8]) {
        let mut records = self.records.lock();
        records
            .entry(leaf.node_id())
            .or_insert_with(|| CompactionRecord::for_leaf(leaf))
            .add_deleted_key(key.to_vec());
    }

    /// Ask the next pass to check `leaf` for emptiness and prune it.
    pub fn add_empty_candidate<L: LeafNode + ?Sized>(&self, leaf: &L) {
        let mut records = self.records.lock();
        records
            .entry(leaf.node_id())
            .or_insert_with(|| CompactionRecord::for_leaf(leaf));
    }

    /// Queue a record, merging its keys into an existing record for the
    /// same leaf.
    pub fn add_record(&self, record: CompactionRecord) {
        let mut records = self.records.lock();
        Self::merge_locked(&mut records, record);
    }

    /// Queue several records under one acquisition of the queue lock.
    pub fn add_records<I>(&self, batch: I)
    where
        I: IntoIterator<Item = CompactionRecord>,
    {
        let mut records = self.records.lock();
        for record in batch {
            Self::merge_locked(&mut records, record);
        }
    }

    fn merge_locked(records: &mut HashMap<NodeId, CompactionRecord>, record: CompactionRecord) {
        match records.get_mut(&record.node_id) {
            Some(existing) => existing.merge_deleted_keys(record),
            None => {
                records.insert(record.node_id, record);
            }
        }
    }

    /// Take the whole queue, leaving a fresh empty map for producers.
    pub fn drain_snapshot(&self) -> HashMap<NodeId, CompactionRecord> {
        let mut records = self.records.lock();
        std::mem::take(&mut *records)
    }

    /// Take the record for `node_id` if it carries deleted keys.
    ///
    /// A record with no keys is a prune request only the daemon can serve;
    /// it stays queued.
    pub fn remove_compressible(&self, node_id: NodeId) -> Option<CompactionRecord> {
        let mut records = self.records.lock();
        match records.get(&node_id) {
            Some(record) if record.has_deleted_keys() => records.remove(&node_id),
            _ => None,
        }
    }

    /// True if a record for `node_id` is queued.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.records.lock().contains_key(&node_id)
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for CompactionQueue {
    fn default() -> Self {
        Self::new()
    }
}
