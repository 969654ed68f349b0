//! In-memory B-tree over latched nodes.
//!
//! Layout: a root internal node (created on first insert, never removed),
//! optional internal levels, and leaves. A leaf slot either holds a record
//! or roots a duplicate subtree: one internal node over duplicate leaves.
//!
//! Latching is strictly top-down. Reads couple shared latches on internal
//! nodes and end on an exclusively latched leaf. Writes couple exclusive
//! latches and keep the leaf's parent so a full leaf can split. Internal
//! nodes never split.
//!
//! Logical deletes only mark a slot deleted and record the key on the
//! compaction queue. Physical removal is left to the compressor, which
//! drives this tree through the `Tree` trait.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use leafsweep_core::{
    CompactionQueue, DatabaseId, Key, Latch, Latched, LeafNode, NodeId, PruneOutcome, SlotTarget,
    SweepError, SweepResult, Tree, UtilizationTracker,
};

use crate::config::TreeConfig;
use crate::node::{Child, LeafBody, MemNode, NodeBody, Slot, SlotData};

/// Counts gathered by walking the whole tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    /// Internal nodes of the main tree, root included
    pub internal_nodes: usize,
    /// Leaves of the main tree and of duplicate subtrees
    pub leaves: usize,
    /// Duplicate subtree roots
    pub duplicate_roots: usize,
    /// Live records, duplicates included
    pub live_records: usize,
    /// Slots marked deleted and not yet stripped
    pub deleted_slots: usize,
}

/// Copy of one leaf's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafView {
    /// Leaf identity
    pub node_id: NodeId,
    /// Identifier key
    pub id_key: Key,
    /// Keys of live slots, in order
    pub live: Vec<Key>,
    /// Keys of deleted slots, in order
    pub deleted: Vec<Key>,
}

impl LeafView {
    /// All slots, live or deleted.
    pub fn entry_count(&self) -> usize {
        self.live.len() + self.deleted.len()
    }
}

enum SlotState {
    Missing,
    Deleted,
    Live(Vec<u8>),
    Duplicates(Arc<MemNode>),
}

struct Split {
    left: Arc<MemNode>,
    right: Arc<MemNode>,
    separator: Key,
}

fn corrupted(database: DatabaseId, reason: &str) -> SweepError {
    SweepError::TreeCorrupted {
        database,
        reason: reason.to_string(),
    }
}

fn with_leaf<R>(node: &MemNode, f: impl FnOnce(&mut LeafBody) -> R) -> SweepResult<R> {
    match &mut *node.body() {
        NodeBody::Leaf(leaf) => Ok(f(leaf)),
        NodeBody::Internal(_) => Err(corrupted(node.database_id(), "expected a leaf")),
    }
}

fn slot_state(leaf: &MemNode, key: &[u8]) -> SweepResult<SlotState> {
    with_leaf(leaf, |body| match body.slot(key).map(|s| &s.data) {
        None => SlotState::Missing,
        Some(SlotData::Record { deleted: true, .. }) => SlotState::Deleted,
        Some(SlotData::Record { value, .. }) => SlotState::Live(value.clone()),
        Some(SlotData::Duplicates(root)) => SlotState::Duplicates(Arc::clone(root)),
    })
}

fn latch_for_descent(node: &MemNode) -> SweepResult<()> {
    if node.is_leaf() {
        node.latch().acquire_exclusive()
    } else {
        node.latch().acquire_shared()
    }
}

/// Release latches bottom-up. Nodes the caller does not hold are skipped.
pub(crate) fn release_all(nodes: &[Arc<MemNode>]) {
    for node in nodes.iter().rev() {
        node.latch().release_if_owner();
    }
}

fn view_of(leaf: &MemNode) -> SweepResult<LeafView> {
    let node_id = leaf.id();
    with_leaf(leaf, |body| {
        let (deleted, live): (Vec<&Slot>, Vec<&Slot>) = body.slots.iter().partition(|s| s.is_deleted());
        LeafView {
            node_id,
            id_key: body.id_key.clone(),
            live: live.into_iter().map(|s| s.key.clone()).collect(),
            deleted: deleted.into_iter().map(|s| s.key.clone()).collect(),
        }
    })
}

fn visit(node: &MemNode, below_leaf: bool, shape: &mut TreeShape) -> SweepResult<()> {
    if node.is_leaf() {
        shape.leaves += 1;
        with_leaf(node, |body| {
            for slot in &body.slots {
                match &slot.data {
                    SlotData::Record { deleted: true, .. } => shape.deleted_slots += 1,
                    SlotData::Record { .. } => shape.live_records += 1,
                    SlotData::Duplicates(_) => {}
                }
            }
        })?;
    } else if below_leaf {
        shape.duplicate_roots += 1;
    } else {
        shape.internal_nodes += 1;
    }

    for child in node.descendants() {
        latch_for_descent(&child)?;
        let result = visit(&child, node.is_leaf(), shape);
        child.latch().release_if_owner();
        result?;
    }
    Ok(())
}

/// One database's B-tree.
pub struct MemTree {
    database_id: DatabaseId,
    config: TreeConfig,
    queue: Arc<CompactionQueue>,
    root_latch: Latch,
    root: Mutex<Option<Arc<MemNode>>>,
}

impl MemTree {
    /// Empty tree whose logical deletes feed `queue`.
    pub fn new(database_id: DatabaseId, config: TreeConfig, queue: Arc<CompactionQueue>) -> SweepResult<Self> {
        config.validate()?;
        Ok(Self {
            database_id,
            config,
            queue,
            root_latch: Latch::new(format!("root-{}", database_id)),
            root: Mutex::new(None),
        })
    }

    /// Tree configuration.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// The queue logical deletes are recorded on.
    pub fn queue(&self) -> &Arc<CompactionQueue> {
        &self.queue
    }

    fn new_leaf(&self, dup_main_key: Option<&[u8]>) -> Arc<MemNode> {
        MemNode::new_leaf(
            self.database_id,
            LeafBody::empty(dup_main_key.map(|k| k.to_vec())),
            self.config.node_file,
        )
    }

    fn new_subtree(&self, main_key: &[u8], dups: &[&[u8]]) -> Arc<MemNode> {
        let mut body = LeafBody::empty(Some(main_key.to_vec()));
        for dup in dups {
            if body.find(dup).is_err() {
                body.insert(Slot::record(dup, &[], self.config.slot_file));
            }
        }
        let leaf = MemNode::new_leaf(self.database_id, body, self.config.node_file);
        let children = vec![Child {
            key: leaf.identifier_key(),
            node: leaf,
        }];
        MemNode::new_internal(self.database_id, children, self.config.node_file)
    }

    /// Latch the root through the root latch. `None` before the first insert.
    fn latch_root(&self, exclusive: bool) -> SweepResult<Option<Arc<MemNode>>> {
        self.root_latch.acquire()?;
        let root = self.root.lock().clone();
        let latched = match &root {
            Some(node) if exclusive => node.latch().acquire_exclusive(),
            Some(node) => node.latch().acquire_shared(),
            None => Ok(()),
        };
        self.root_latch.release()?;
        latched?;
        Ok(root)
    }

    fn latch_root_for_write(&self) -> SweepResult<Arc<MemNode>> {
        self.root_latch.acquire()?;
        let root = {
            let mut slot = self.root.lock();
            let root = slot.get_or_insert_with(|| {
                MemNode::new_internal(self.database_id, Vec::new(), self.config.node_file)
            });
            Arc::clone(root)
        };
        let latched = root.latch().acquire_exclusive();
        self.root_latch.release()?;
        latched?;
        Ok(root)
    }

    /// Couple down from a latched internal node to the leaf covering `key`.
    fn descend(&self, mut node: Arc<MemNode>, key: &[u8]) -> SweepResult<Option<Arc<MemNode>>> {
        loop {
            let Some(child) = node.child_for(key) else {
                node.latch().release()?;
                return Ok(None);
            };
            if let Err(err) = latch_for_descent(&child) {
                node.latch().release_if_owner();
                return Err(err);
            }
            node.latch().release()?;
            if child.is_leaf() {
                return Ok(Some(child));
            }
            node = child;
        }
    }

    /// Couple down with exclusive latches from `parent`, itself latched
    /// exclusively, and return the leaf for `key` with its parent. An empty
    /// parent gets a fresh leaf.
    fn descend_for_write(
        &self,
        mut parent: Arc<MemNode>,
        key: &[u8],
        dup_main_key: Option<&[u8]>,
    ) -> SweepResult<(Arc<MemNode>, Arc<MemNode>)> {
        loop {
            let child = match parent.child_for(key) {
                Some(child) => child,
                None => {
                    let leaf = self.new_leaf(dup_main_key);
                    if let Err(err) = leaf.latch().acquire_exclusive() {
                        parent.latch().release_if_owner();
                        return Err(err);
                    }
                    if let NodeBody::Internal(children) = &mut *parent.body() {
                        children.push(Child {
                            key: key.to_vec(),
                            node: Arc::clone(&leaf),
                        });
                    }
                    return Ok((parent, leaf));
                }
            };
            if let Err(err) = child.latch().acquire_exclusive() {
                parent.latch().release_if_owner();
                return Err(err);
            }
            if child.is_leaf() {
                return Ok((parent, child));
            }
            parent.latch().release()?;
            parent = child;
        }
    }

    /// Insert or overwrite a record. On a key that owns duplicates `value`
    /// is added as one more duplicate.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> SweepResult<()> {
        let root = self.latch_root_for_write()?;
        let (parent, leaf) = self.descend_for_write(root, key, None)?;
        let result = self.insert_latched(&parent, &leaf, key, value, false);
        release_all(&[parent, leaf]);
        result
    }

    /// Add `dup` to the duplicate set of `key`, creating the duplicate
    /// subtree if needed. A live plain record under `key` becomes the first
    /// duplicate.
    pub fn insert_duplicate(&self, key: &[u8], dup: &[u8]) -> SweepResult<()> {
        let root = self.latch_root_for_write()?;
        let (parent, leaf) = self.descend_for_write(root, key, None)?;
        let result = self.insert_latched(&parent, &leaf, key, dup, true);
        release_all(&[parent, leaf]);
        result
    }

    fn insert_latched(
        &self,
        parent: &Arc<MemNode>,
        leaf: &Arc<MemNode>,
        key: &[u8],
        value: &[u8],
        duplicate: bool,
    ) -> SweepResult<()> {
        let slot_file = self.config.slot_file;
        match (slot_state(leaf, key)?, duplicate) {
            (SlotState::Missing, false) => self.insert_slot(parent, leaf, Slot::record(key, value, slot_file)),
            (SlotState::Missing, true) => {
                let root = self.new_subtree(key, &[value]);
                self.insert_slot(parent, leaf, Slot::duplicates(key, root, slot_file))
            }
            (SlotState::Deleted | SlotState::Live(_), false) => with_leaf(leaf, |body| {
                if let Some(slot) = body.slot_mut(key) {
                    *slot = Slot::record(key, value, slot_file);
                }
            }),
            (SlotState::Deleted, true) => {
                let root = self.new_subtree(key, &[value]);
                with_leaf(leaf, |body| {
                    if let Some(slot) = body.slot_mut(key) {
                        *slot = Slot::duplicates(key, root, slot_file);
                    }
                })
            }
            (SlotState::Live(existing), true) => {
                let root = self.new_subtree(key, &[&existing, value]);
                with_leaf(leaf, |body| {
                    if let Some(slot) = body.slot_mut(key) {
                        *slot = Slot::duplicates(key, root, slot_file);
                    }
                })
            }
            (SlotState::Duplicates(root), _) => {
                root.latch().acquire_exclusive()?;
                let (din, dbin) = self.descend_for_write(root, value, Some(key))?;
                let result = self.insert_latched(&din, &dbin, value, &[], false);
                release_all(&[din, dbin]);
                result
            }
        }
    }

    fn insert_slot(&self, parent: &Arc<MemNode>, leaf: &Arc<MemNode>, slot: Slot) -> SweepResult<()> {
        if leaf.entry_count() < self.config.leaf_capacity {
            return with_leaf(leaf, |body| body.insert(slot));
        }
        let split = self.split_leaf(parent, leaf)?;
        let target = if slot.key >= split.separator {
            split.right
        } else {
            split.left
        };
        with_leaf(&target, |body| body.insert(slot))
    }

    /// Split a full leaf in two. The half holding the identifier key stays
    /// in `leaf`; the other half moves to a new sibling.
    fn split_leaf(&self, parent: &Arc<MemNode>, leaf: &Arc<MemNode>) -> SweepResult<Split> {
        let (sibling, separator, lowest, sibling_is_right, moved_deleted) = with_leaf(leaf, |body| {
            let lowest = body.slots[0].key.clone();
            let mid = body.slots.len() / 2;
            let upper = body.slots.split_off(mid);
            let separator = upper[0].key.clone();
            let keep_upper = body.id_key >= separator;
            let moved = if keep_upper {
                std::mem::replace(&mut body.slots, upper)
            } else {
                upper
            };
            let moved_deleted: Vec<Key> = moved
                .iter()
                .filter(|s| s.is_deleted())
                .map(|s| s.key.clone())
                .collect();
            let sibling_body = LeafBody {
                id_key: moved[0].key.clone(),
                slots: moved,
                dup_main_key: body.dup_main_key.clone(),
            };
            let sibling = MemNode::new_leaf(self.database_id, sibling_body, self.config.node_file);
            (sibling, separator, lowest, !keep_upper, moved_deleted)
        })?;

        let split = if sibling_is_right {
            Split {
                left: Arc::clone(leaf),
                right: sibling,
                separator,
            }
        } else {
            Split {
                left: sibling,
                right: Arc::clone(leaf),
                separator,
            }
        };

        let linked = match &mut *parent.body() {
            NodeBody::Internal(children) => match children.iter().position(|c| Arc::ptr_eq(&c.node, leaf)) {
                Some(pos) => {
                    // A first child may carry a key above its contents.
                    let low_key = std::cmp::min(children[pos].key.clone(), lowest);
                    children[pos] = Child {
                        key: low_key,
                        node: Arc::clone(&split.left),
                    };
                    children.insert(
                        pos + 1,
                        Child {
                            key: split.separator.clone(),
                            node: Arc::clone(&split.right),
                        },
                    );
                    true
                }
                None => false,
            },
            NodeBody::Leaf(_) => false,
        };
        if !linked {
            return Err(corrupted(self.database_id, "split leaf is not a child of its parent"));
        }

        // Deleted slots that moved are queued against their new leaf while
        // the parent latch still hides it from everyone else.
        let sibling = if sibling_is_right { &split.right } else { &split.left };
        for key in &moved_deleted {
            self.queue.add_deleted_key(&**sibling, key);
        }
        trace!(left = %split.left.id(), right = %split.right.id(), "leaf split");
        Ok(split)
    }

    /// Logically delete `key`. Returns false if there was no live record.
    pub fn remove(&self, key: &[u8]) -> SweepResult<bool> {
        let Some(leaf) = self.search(key)? else {
            return Ok(false);
        };
        self.mark_deleted(leaf, key)
    }

    /// Logically delete one duplicate of `key`.
    pub fn remove_duplicate(&self, key: &[u8], dup: &[u8]) -> SweepResult<bool> {
        let Some(leaf) = self.search_duplicate_leaf(key, dup)? else {
            return Ok(false);
        };
        self.mark_deleted(leaf, dup)
    }

    fn mark_deleted(&self, leaf: Arc<MemNode>, key: &[u8]) -> SweepResult<bool> {
        let marked = with_leaf(&leaf, |body| body.slot_mut(key).is_some_and(|slot| slot.mark_deleted()));
        if let Ok(true) = marked {
            self.queue.add_deleted_key(&*leaf, key);
        }
        leaf.latch().release()?;
        marked
    }

    /// Latched duplicate leaf covering `dup` under `key`.
    pub(crate) fn search_duplicate_leaf(&self, key: &[u8], dup: &[u8]) -> SweepResult<Option<Arc<MemNode>>> {
        let Some(leaf) = self.search(key)? else {
            return Ok(None);
        };
        let target = match self.duplicate_root(&leaf, key) {
            Ok(target) => target,
            Err(err) => {
                leaf.latch().release_if_owner();
                return Err(err);
            }
        };
        leaf.latch().release()?;
        match target {
            SlotTarget::Duplicates(root) => self.search_subtree(root, dup),
            SlotTarget::Missing | SlotTarget::Plain => Ok(None),
        }
    }

    /// Live value of `key`.
    pub fn get(&self, key: &[u8]) -> SweepResult<Option<Vec<u8>>> {
        let Some(leaf) = self.search(key)? else {
            return Ok(None);
        };
        let value = with_leaf(&leaf, |body| body.slot(key).and_then(|s| s.live_value()).map(|v| v.to_vec()));
        leaf.latch().release()?;
        value
    }

    /// Live duplicates of `key`, in order. A plain record counts as one.
    pub fn get_duplicates(&self, key: &[u8]) -> SweepResult<Vec<Key>> {
        let Some(leaf) = self.search(key)? else {
            return Ok(Vec::new());
        };
        let state = slot_state(&leaf, key);
        let root = match state {
            Ok(SlotState::Duplicates(root)) => root,
            other => {
                leaf.latch().release()?;
                return match other? {
                    SlotState::Live(value) => Ok(vec![value]),
                    _ => Ok(Vec::new()),
                };
            }
        };

        if let Err(err) = root.latch().acquire_shared() {
            leaf.latch().release_if_owner();
            return Err(err);
        }
        leaf.latch().release()?;

        let mut dups = Vec::new();
        let mut result = Ok(());
        for child in root.descendants() {
            if let Err(err) = child.latch().acquire_exclusive() {
                result = Err(err);
                break;
            }
            let collected = with_leaf(&child, |body| {
                dups.extend(body.slots.iter().filter(|s| !s.is_deleted()).map(|s| s.key.clone()))
            });
            child.latch().release_if_owner();
            if let Err(err) = collected {
                result = Err(err);
                break;
            }
        }
        root.latch().release()?;
        result.map(|_| dups)
    }

    /// Contents of the leaf covering `key`.
    pub fn leaf_view(&self, key: &[u8]) -> SweepResult<Option<LeafView>> {
        let Some(leaf) = self.search(key)? else {
            return Ok(None);
        };
        let view = view_of(&leaf);
        leaf.latch().release()?;
        view.map(Some)
    }

    /// Contents of the duplicate leaf covering `dup` under `key`.
    pub fn duplicate_leaf_view(&self, key: &[u8], dup: &[u8]) -> SweepResult<Option<LeafView>> {
        let Some(leaf) = self.search_duplicate_leaf(key, dup)? else {
            return Ok(None);
        };
        let view = view_of(&leaf);
        leaf.latch().release()?;
        view.map(Some)
    }

    /// Walk the whole tree.
    pub fn shape(&self) -> SweepResult<TreeShape> {
        let mut shape = TreeShape::default();
        let Some(root) = self.latch_root(false)? else {
            return Ok(shape);
        };
        let result = visit(&root, false, &mut shape);
        root.latch().release_if_owner();
        result.map(|_| shape)
    }

    /// Replace an empty tree with explicit branches: each branch becomes an
    /// internal node under the root and each inner list one leaf, with every
    /// key stored as its own value. Keys must ascend across the layout.
    pub fn load_branches<K: AsRef<[u8]>>(&self, branches: &[Vec<Vec<K>>]) -> SweepResult<()> {
        let mut children = Vec::with_capacity(branches.len());
        for branch in branches {
            let mut leaves = Vec::with_capacity(branch.len());
            for keys in branch {
                let mut body = LeafBody::empty(None);
                for key in keys {
                    body.insert(Slot::record(key.as_ref(), key.as_ref(), self.config.slot_file));
                }
                let leaf = MemNode::new_leaf(self.database_id, body, self.config.node_file);
                leaves.push(Child {
                    key: leaf.identifier_key(),
                    node: leaf,
                });
            }
            let key = leaves.first().map(|c| c.key.clone()).unwrap_or_default();
            children.push(Child {
                key,
                node: MemNode::new_internal(self.database_id, leaves, self.config.node_file),
            });
        }

        let root = self.latch_root_for_write()?;
        let loaded = match &mut *root.body() {
            NodeBody::Internal(existing) if existing.is_empty() => {
                *existing = children;
                true
            }
            _ => false,
        };
        root.latch().release()?;
        if !loaded {
            return Err(SweepError::InvalidConfig {
                field: "branches",
                reason: "tree is not empty".into(),
            });
        }
        Ok(())
    }

    /// Latch the path from the lowest node that keeps other children down
    /// to the leaf covering `key`. `top` is latched exclusively on entry.
    ///
    /// Everything below the first node of the returned path is removed
    /// together if the leaf turns out to be removable.
    fn latch_prune_path(&self, top: Arc<MemNode>, key: &[u8]) -> SweepResult<Option<Vec<Arc<MemNode>>>> {
        let mut path: Vec<Arc<MemNode>> = Vec::new();
        let mut node = top;
        loop {
            if node.is_leaf() {
                path.push(node);
                return Ok(Some(path));
            }
            let Some(child) = node.child_for(key) else {
                path.push(node);
                release_all(&path);
                return Ok(None);
            };
            if let Err(err) = child.latch().acquire_exclusive() {
                path.push(node);
                release_all(&path);
                return Err(err);
            }
            if node.entry_count() > 1 {
                release_all(&path);
                path.clear();
            }
            path.push(node);
            node = child;
        }
    }

    /// Detach the leaf at the end of a latched prune path.
    fn detach_leaf(&self, path: &[Arc<MemNode>], tracker: &mut UtilizationTracker) -> SweepResult<PruneOutcome> {
        let [top, removed @ ..] = path else {
            return Ok(PruneOutcome::NotEmpty);
        };
        let (Some(first), Some(leaf)) = (removed.first(), removed.last()) else {
            return Ok(PruneOutcome::NotEmpty);
        };
        if leaf.entry_count() > 0 {
            return Ok(PruneOutcome::NotEmpty);
        }
        if removed.iter().any(|n| n.cursor_count() > 0) {
            return Ok(PruneOutcome::CursorsPresent);
        }
        if !top.remove_child(first) {
            return Err(corrupted(self.database_id, "prune path is not linked to its parent"));
        }
        for node in removed {
            node.count_obsolete(tracker);
        }
        debug!(
            database = %self.database_id,
            leaf = %leaf.id(),
            removed_nodes = removed.len(),
            "pruned leaf"
        );
        Ok(PruneOutcome::Removed)
    }

    /// Prune inside the duplicate subtree of `key`, with `leaf` latched.
    /// The flag is true when removing the whole subtree emptied `leaf`.
    fn delete_duplicate_latched(
        &self,
        leaf: &Arc<MemNode>,
        key: &[u8],
        id_key: &[u8],
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<(PruneOutcome, bool)> {
        let SlotState::Duplicates(root) = slot_state(leaf, key)? else {
            return Ok((PruneOutcome::NotEmpty, false));
        };
        root.latch().acquire_exclusive()?;
        let Some(path) = self.latch_prune_path(Arc::clone(&root), id_key)? else {
            return Ok((PruneOutcome::NotEmpty, false));
        };
        let outcome = self.detach_duplicate_leaf(leaf, &root, key, &path, tracker);
        release_all(&path);
        outcome
    }

    fn detach_duplicate_leaf(
        &self,
        leaf: &Arc<MemNode>,
        root: &Arc<MemNode>,
        key: &[u8],
        path: &[Arc<MemNode>],
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<(PruneOutcome, bool)> {
        let whole_subtree = path.first().is_some_and(|top| Arc::ptr_eq(top, root)) && root.entry_count() == 1;
        if !whole_subtree {
            return self.detach_leaf(path, tracker).map(|outcome| (outcome, false));
        }

        let Some(dup_leaf) = path.last() else {
            return Ok((PruneOutcome::NotEmpty, false));
        };
        if dup_leaf.entry_count() > 0 {
            return Ok((PruneOutcome::NotEmpty, false));
        }
        // The subtree hangs off a slot of `leaf`, so cursors there block it too.
        if leaf.cursor_count() > 0 || path.iter().any(|n| n.cursor_count() > 0) {
            return Ok((PruneOutcome::CursorsPresent, false));
        }

        let Some(slot) = with_leaf(leaf, |body| body.remove(key))? else {
            return Err(corrupted(self.database_id, "duplicate root vanished from its slot"));
        };
        tracker.count_obsolete(slot.file_id, slot.size);
        for node in path {
            node.count_obsolete(tracker);
        }
        let emptied = leaf.entry_count() == 0;
        debug!(
            database = %self.database_id,
            leaf = %leaf.id(),
            emptied,
            "removed empty duplicate subtree"
        );
        Ok((PruneOutcome::Removed, emptied))
    }
}

impl Tree for MemTree {
    type Leaf = MemNode;
    type DupRoot = MemNode;

    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn search(&self, key: &[u8]) -> SweepResult<Option<Arc<MemNode>>> {
        let Some(root) = self.latch_root(false)? else {
            return Ok(None);
        };
        self.descend(root, key)
    }

    fn duplicate_root(&self, leaf: &MemNode, main_key: &[u8]) -> SweepResult<SlotTarget<Arc<MemNode>>> {
        match slot_state(leaf, main_key)? {
            SlotState::Missing | SlotState::Deleted => Ok(SlotTarget::Missing),
            SlotState::Live(_) => Ok(SlotTarget::Plain),
            SlotState::Duplicates(root) => {
                root.latch().acquire_shared()?;
                Ok(SlotTarget::Duplicates(root))
            }
        }
    }

    fn search_subtree(&self, root: Arc<MemNode>, dup_key: &[u8]) -> SweepResult<Option<Arc<MemNode>>> {
        self.descend(root, dup_key)
    }

    fn delete(&self, id_key: &[u8], tracker: &mut UtilizationTracker) -> SweepResult<PruneOutcome> {
        // A tree that was never written has nothing left to remove.
        let Some(root) = self.latch_root(true)? else {
            return Ok(PruneOutcome::NotEmpty);
        };
        let Some(path) = self.latch_prune_path(root, id_key)? else {
            return Ok(PruneOutcome::NotEmpty);
        };
        let outcome = self.detach_leaf(&path, tracker);
        release_all(&path);
        outcome
    }

    fn delete_duplicate(
        &self,
        main_key: &[u8],
        id_key: &[u8],
        tracker: &mut UtilizationTracker,
    ) -> SweepResult<PruneOutcome> {
        let Some(leaf) = self.search(main_key)? else {
            return Ok(PruneOutcome::NotEmpty);
        };
        let result = self.delete_duplicate_latched(&leaf, main_key, id_key, tracker);
        if let Ok((_, true)) = result {
            self.queue.add_empty_candidate(&*leaf);
        }
        leaf.latch().release_if_owner();
        result.map(|(outcome, _)| outcome)
    }
}

impl std::fmt::Debug for MemTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTree")
            .field("database", &self.database_id)
            .field("leaf_capacity", &self.config.leaf_capacity)
            .finish()
    }
}
