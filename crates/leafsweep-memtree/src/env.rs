//! In-memory environment: the database registry and utilization log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use leafsweep_core::{
    CompactionQueue, DatabaseId, Environment, SweepError, SweepResult, TrackedFileSummary,
    UtilizationSink,
};

use crate::config::TreeConfig;
use crate::tree::MemTree;

/// Utilization profile that keeps every batch it is given.
#[derive(Debug, Default)]
pub struct MemUtilization {
    batches: Mutex<Vec<Vec<TrackedFileSummary>>>,
}

impl MemUtilization {
    /// Batches received so far.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Obsolete bytes over all batches.
    pub fn total_bytes(&self) -> u64 {
        self.batches.lock().iter().flatten().map(|s| s.obsolete_bytes).sum()
    }

    /// Obsolete items over all batches.
    pub fn total_count(&self) -> u64 {
        self.batches.lock().iter().flatten().map(|s| s.obsolete_count).sum()
    }

    /// Copy of every batch.
    pub fn batches(&self) -> Vec<Vec<TrackedFileSummary>> {
        self.batches.lock().clone()
    }
}

impl UtilizationSink for MemUtilization {
    fn count_and_log(&self, summaries: &[TrackedFileSummary]) -> SweepResult<()> {
        if !summaries.is_empty() {
            self.batches.lock().push(summaries.to_vec());
        }
        Ok(())
    }
}

/// Set of in-memory databases sharing one compaction queue.
pub struct MemEnvironment {
    queue: Arc<CompactionQueue>,
    databases: RwLock<HashMap<DatabaseId, Arc<MemTree>>>,
    closed: AtomicBool,
    invalid: Mutex<Option<SweepError>>,
    utilization: MemUtilization,
}

impl MemEnvironment {
    /// Empty environment feeding `queue`.
    pub fn new(queue: Arc<CompactionQueue>) -> Self {
        Self {
            queue,
            databases: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            invalid: Mutex::new(None),
            utilization: MemUtilization::default(),
        }
    }

    /// Queue shared by every database.
    pub fn queue(&self) -> &Arc<CompactionQueue> {
        &self.queue
    }

    /// Open database `id`, or return it if it is already open.
    pub fn open_database(&self, id: DatabaseId, config: TreeConfig) -> SweepResult<Arc<MemTree>> {
        if let Some(tree) = self.databases.read().get(&id) {
            return Ok(Arc::clone(tree));
        }
        let mut databases = self.databases.write();
        if let Some(tree) = databases.get(&id) {
            return Ok(Arc::clone(tree));
        }
        let tree = Arc::new(MemTree::new(id, config, Arc::clone(&self.queue))?);
        databases.insert(id, Arc::clone(&tree));
        info!(database = %id, "database opened");
        Ok(tree)
    }

    /// Close database `id`. Queued work for it is dropped by the next pass.
    pub fn close_database(&self, id: DatabaseId) -> bool {
        let removed = self.databases.write().remove(&id).is_some();
        if removed {
            info!(database = %id, "database closed");
        }
        removed
    }

    /// Close the environment. Passes stop at the next record.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("environment closed");
        }
    }

    /// True after a fatal error.
    pub fn is_invalid(&self) -> bool {
        self.invalid.lock().is_some()
    }

    /// The error that invalidated the environment.
    pub fn invalidation_cause(&self) -> Option<SweepError> {
        self.invalid.lock().clone()
    }

    /// The utilization profile.
    pub fn utilization_log(&self) -> &MemUtilization {
        &self.utilization
    }
}

impl Environment for MemEnvironment {
    type Tree = MemTree;

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn database(&self, id: DatabaseId) -> Option<Arc<MemTree>> {
        self.databases.read().get(&id).cloned()
    }

    fn utilization(&self) -> &dyn UtilizationSink {
        &self.utilization
    }

    fn invalidate(&self, cause: &SweepError) {
        error!(error = %cause, "environment invalidated");
        let mut invalid = self.invalid.lock();
        if invalid.is_none() {
            *invalid = Some(cause.clone());
        }
    }
}

impl std::fmt::Debug for MemEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemEnvironment")
            .field("databases", &self.databases.read().len())
            .field("closed", &self.is_closed())
            .field("invalid", &self.is_invalid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafsweep_core::FileId;

    #[test]
    fn test_open_close_database() {
        let env = MemEnvironment::new(Arc::new(CompactionQueue::new()));
        let a = env.open_database(DatabaseId(1), TreeConfig::default()).unwrap();
        let again = env.open_database(DatabaseId(1), TreeConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert!(env.database(DatabaseId(1)).is_some());

        assert!(env.close_database(DatabaseId(1)));
        assert!(!env.close_database(DatabaseId(1)));
        assert!(env.database(DatabaseId(1)).is_none());

        assert!(env
            .open_database(DatabaseId(2), TreeConfig::with_capacity(1))
            .is_err());
    }

    #[test]
    fn test_invalidate_keeps_first_cause() {
        let env = MemEnvironment::new(Arc::new(CompactionQueue::new()));
        assert!(!env.is_invalid());
        env.invalidate(&SweepError::TreeCorrupted {
            database: DatabaseId(1),
            reason: "first".into(),
        });
        env.invalidate(&SweepError::TreeCorrupted {
            database: DatabaseId(1),
            reason: "second".into(),
        });
        match env.invalidation_cause() {
            Some(SweepError::TreeCorrupted { reason, .. }) => assert_eq!(reason, "first"),
            other => panic!("Expected TreeCorrupted, got {:?}", other),
        }
    }

    #[test]
    fn test_utilization_log() {
        let log = MemUtilization::default();
        log.count_and_log(&[]).unwrap();
        assert_eq!(log.batch_count(), 0);

        log.count_and_log(&[TrackedFileSummary {
            file_id: FileId(1),
            obsolete_count: 2,
            obsolete_bytes: 40,
        }])
        .unwrap();
        assert_eq!(log.batch_count(), 1);
        assert_eq!(log.total_count(), 2);
        assert_eq!(log.total_bytes(), 40);
    }
}
