//! LeafSweep Core: space reclamation for latched B-trees
//!
//! Deleting a record from a B-tree leaf only marks its slot deleted. This
//! crate removes those slots later and prunes leaves that end up empty,
//! while readers, writers and splits keep running against the same tree.
//!
//! # Architecture
//!
//! - **Latches**: `Latch` (exclusive, FIFO) and `SharedLatch` (reader/writer,
//!   no upgrade) guard individual nodes
//! - **Queue**: writers record deleted keys per leaf; a pass swaps the whole
//!   map out and works on the snapshot
//! - **Compressor**: strips deleted slots, from a background pass or inline
//!   by a thread that already holds the leaf latch
//! - **Pruner**: asks the tree to detach empty leaves and collapse emptied
//!   ancestors, with no latches held on entry
//! - **Daemon**: background thread that runs passes on a timer
//!
//! # Bring Your Own Tree
//!
//! The crate owns no tree nodes. Trees plug in through the `Environment`,
//! `Tree` and `LeafNode` traits; `leafsweep-memtree` is an in-memory
//! implementation.

pub mod compressor;
pub mod config;
pub mod daemon;
pub mod error;
pub mod latch;
pub mod node;
pub mod pruner;
pub mod queue;
pub mod shared_latch;
pub mod stats;
pub mod tracker;
pub mod tree;

// Re-export key types for convenience
pub use compressor::{Compressor, LazyOutcome, PassSummary};
pub use config::Config;
pub use daemon::{start_daemon, DaemonHandle, DaemonMessage};
pub use error::{SweepError, SweepResult};
pub use latch::{latches_held, Latch, LatchStats};
pub use node::{DatabaseId, FileId, Key, Latched, LeafKind, LeafNode, NodeId};
pub use pruner::{PruneTarget, Pruner};
pub use queue::{CompactionQueue, CompactionRecord};
pub use shared_latch::SharedLatch;
pub use stats::{CompressorStats, CompressorStatsSnapshot, RunCounters};
pub use tracker::{TrackedFileSummary, UtilizationSink, UtilizationTracker};
pub use tree::{EnvLeaf, Environment, PruneOutcome, SlotTarget, Tree};
