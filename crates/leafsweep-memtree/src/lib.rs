//! In-memory latched B-tree for LeafSweep
//!
//! Implements the `Environment`, `Tree` and `LeafNode` traits of
//! `leafsweep-core` over a B-tree that lives entirely in memory.
//!
//! # Architecture
//!
//! - Every node carries a `SharedLatch`; leaves are exclusive-only
//! - Searches couple latches top-down and return the leaf latched
//! - `remove` marks a slot deleted and queues the key; the compressor
//!   strips the slot and prunes the leaf once it is empty
//! - Keys may own a duplicate subtree: one internal node over duplicate
//!   leaves, hanging off a slot of an ordinary leaf
//! - Cursors pin leaves so the compressor leaves them alone
//!
//! `MemStore` wires an environment, its compressor and the daemon together.

pub mod config;
pub mod cursor;
pub mod db;
pub mod env;
pub mod node;
pub mod tree;

pub use config::TreeConfig;
pub use cursor::MemCursor;
pub use db::MemStore;
pub use env::{MemEnvironment, MemUtilization};
pub use node::MemNode;
pub use tree::{LeafView, MemTree, TreeShape};
