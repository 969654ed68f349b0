//! `MemStore`: an environment, its compressor and the daemon in one handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use leafsweep_core::{
    start_daemon, CompactionQueue, Compressor, CompressorStatsSnapshot, Config, DaemonHandle, DatabaseId,
    Environment, LazyOutcome, Latched, PassSummary, SweepResult, Tree, UtilizationTracker,
};

use crate::config::TreeConfig;
use crate::env::MemEnvironment;
use crate::tree::MemTree;

/// In-memory store with space reclamation.
///
/// Owns the environment and the compressor working for it, and the daemon
/// thread when `Config::run_daemon` is set.
pub struct MemStore {
    env: Arc<MemEnvironment>,
    compressor: Arc<Compressor<MemEnvironment>>,
    daemon: Mutex<Option<DaemonHandle>>,
    config: Config,
}

impl MemStore {
    /// Open an empty store.
    pub fn open(config: Config) -> SweepResult<Self> {
        config.validate()?;
        let queue = Arc::new(CompactionQueue::new());
        let env = Arc::new(MemEnvironment::new(Arc::clone(&queue)));
        let compressor = Arc::new(Compressor::new(Arc::clone(&env), queue));

        let daemon = if config.run_daemon {
            Some(start_daemon(Arc::clone(&compressor), &config)?)
        } else {
            None
        };
        info!(daemon = config.run_daemon, "store opened");

        Ok(Self {
            env,
            compressor,
            daemon: Mutex::new(daemon),
            config,
        })
    }

    /// The environment.
    pub fn env(&self) -> &Arc<MemEnvironment> {
        &self.env
    }

    /// The compressor.
    pub fn compressor(&self) -> &Arc<Compressor<MemEnvironment>> {
        &self.compressor
    }

    /// Store configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open database `id`.
    pub fn open_database(&self, id: DatabaseId, config: TreeConfig) -> SweepResult<Arc<MemTree>> {
        self.env.open_database(id, config)
    }

    /// Run one pass on the calling thread.
    pub fn run_pass(&self) -> SweepResult<PassSummary> {
        self.compressor.run_pass()
    }

    /// Cumulative compressor counters.
    pub fn stats(&self) -> CompressorStatsSnapshot {
        self.compressor.stats()
    }

    /// Ask the daemon for an early pass. False without a running daemon.
    pub fn wakeup_daemon(&self) -> bool {
        self.daemon.lock().as_ref().is_some_and(|d| d.wakeup())
    }

    /// True while the daemon thread is alive.
    pub fn daemon_running(&self) -> bool {
        self.daemon.lock().as_ref().is_some_and(|d| d.is_running())
    }

    /// Compress the leaf covering `key` from the calling thread, the way a
    /// writer that already sits on the leaf would.
    pub fn compress_inline(&self, tree: &MemTree, key: &[u8]) -> SweepResult<LazyOutcome> {
        let Some(leaf) = tree.search(key)? else {
            return Ok(LazyOutcome::Skipped);
        };
        let mut tracker = UtilizationTracker::new();
        let outcome = self.compressor.try_compress_inline(&*leaf, &mut tracker);
        leaf.latch().release()?;

        if !tracker.is_empty() {
            self.env.utilization().count_and_log(&tracker.tracked_files())?;
        }
        outcome
    }

    /// Stop the daemon and close the environment.
    pub fn close(&self) {
        let daemon = self.daemon.lock().take();
        if let Some(daemon) = daemon {
            daemon.shutdown();
        }
        self.env.close();
    }
}

impl Drop for MemStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("env", &self.env)
            .field("queue_len", &self.compressor.queue_len())
            .field("daemon", &self.daemon_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_debug() {
        let store = MemStore::open(Config::manual()).unwrap();
        let debug_str = format!("{:?}", store);
        assert!(debug_str.contains("MemStore"));
        assert!(!store.daemon_running());
        assert!(!store.wakeup_daemon());
    }

    #[test]
    fn test_close_closes_env() {
        let store = MemStore::open(Config::interactive()).unwrap();
        assert!(store.daemon_running());
        store.close();
        assert!(!store.daemon_running());
        assert!(store.env().is_closed());
    }

    #[test]
    fn test_compress_inline() {
        let store = MemStore::open(Config::manual()).unwrap();
        let tree = store.open_database(DatabaseId(1), TreeConfig::with_capacity(8)).unwrap();
        assert_eq!(store.compress_inline(&tree, b"a").unwrap(), LazyOutcome::Skipped);

        tree.insert(b"a", b"1").unwrap();
        tree.insert(b"b", b"2").unwrap();
        assert_eq!(store.compress_inline(&tree, b"a").unwrap(), LazyOutcome::NothingQueued);

        tree.remove(b"a").unwrap();
        assert_eq!(store.compress_inline(&tree, b"a").unwrap(), LazyOutcome::Compressed);
        assert_eq!(tree.leaf_view(b"b").unwrap().unwrap().entry_count(), 1);
        assert_eq!(store.env().utilization_log().total_count(), 1);
        assert_eq!(store.compressor().stats().lazy_processed, 1);
        assert_eq!(store.compressor().queue_len(), 0);
    }
}
