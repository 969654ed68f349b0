//! Error types for LeafSweep operations
//!
//! Only two kinds of failure ever leave the compressor: caller-discipline
//! violations on a latch, and fatal structural errors reported by the tree.
//! Benign races (split-away nodes, closed databases, refilled leaves) and
//! cursor contention are resolved inside a pass and never surface here.

use thiserror::Error;

use crate::node::DatabaseId;

/// LeafSweep error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum SweepError {
    /// The calling thread already holds the latch it asked for
    #[error("latch {name} already held by the current thread")]
    LatchAlreadyHeld {
        /// Name of the latch
        name: String,
    },

    /// The calling thread released a latch it does not hold
    #[error("latch {name} not held by the current thread")]
    LatchNotHeld {
        /// Name of the latch
        name: String,
    },

    /// The calling thread holds shared access and asked for exclusive access
    #[error("latch {name} held shared by the current thread; upgrade to exclusive is not supported")]
    LatchUpgrade {
        /// Name of the latch
        name: String,
    },

    /// The tree reported a structural inconsistency during a validated delete
    #[error("tree for database {database} is corrupted: {reason}")]
    TreeCorrupted {
        /// Database that owns the damaged tree
        database: DatabaseId,
        /// Description of the inconsistency
        reason: String,
    },

    /// A configuration value is out of range
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// An operating system operation failed (thread spawn)
    #[error("I/O error: {message} ({kind})")]
    Io {
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },
}

impl SweepError {
    /// True for latch protocol violations. These point at a bug in the
    /// caller and must never be retried or swallowed.
    pub fn is_caller_bug(&self) -> bool {
        matches!(
            self,
            SweepError::LatchAlreadyHeld { .. }
                | SweepError::LatchNotHeld { .. }
                | SweepError::LatchUpgrade { .. }
        )
    }

    /// True when the enclosing store can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SweepError::TreeCorrupted { .. })
    }
}

/// Convert std::io::Error to SweepError::Io
impl From<std::io::Error> for SweepError {
    fn from(err: std::io::Error) -> Self {
        SweepError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for LeafSweep operations
pub type SweepResult<T> = Result<T, SweepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SweepError::LatchAlreadyHeld {
            name: "BIN-17".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("BIN-17"));
        assert!(display.contains("already held"));

        let err = SweepError::TreeCorrupted {
            database: DatabaseId(3),
            reason: "parent slot points at a missing child".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("database 3"));
        assert!(display.contains("missing child"));
    }

    #[test]
    fn test_classification() {
        let upgrade = SweepError::LatchUpgrade { name: "IN-2".into() };
        assert!(upgrade.is_caller_bug());
        assert!(!upgrade.is_fatal());

        let corrupt = SweepError::TreeCorrupted {
            database: DatabaseId(1),
            reason: "x".into(),
        };
        assert!(corrupt.is_fatal());
        assert!(!corrupt.is_caller_bug());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads left");
        let err: SweepError = io_err.into();

        match err {
            SweepError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::WouldBlock),
            _ => panic!("Expected Io error"),
        }
    }
}
