//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use leafsweep_core::{Config, DatabaseId};
use leafsweep_memtree::{MemStore, MemTree, TreeConfig};

pub const DB: DatabaseId = DatabaseId(7);

/// Store whose passes are driven by the test.
pub fn manual_store() -> MemStore {
    MemStore::open(Config::manual()).unwrap()
}

/// Store with a fast daemon.
pub fn daemon_store(interval_ms: u64) -> MemStore {
    MemStore::open(Config {
        wakeup_interval: Duration::from_millis(interval_ms),
        run_daemon: true,
    })
    .unwrap()
}

pub fn open_tree(store: &MemStore, capacity: usize) -> Arc<MemTree> {
    store.open_database(DB, TreeConfig::with_capacity(capacity)).unwrap()
}

pub fn insert_all(tree: &MemTree, keys: &[&str]) {
    for k in keys {
        tree.insert(k.as_bytes(), k.as_bytes()).unwrap();
    }
}

pub fn bytes(keys: &[&str]) -> Vec<Vec<u8>> {
    keys.iter().map(|k| k.as_bytes().to_vec()).collect()
}

/// Poll `check` until it holds or five seconds pass.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
