//! Tree configuration

use leafsweep_core::{FileId, SweepError, SweepResult};

/// Shape and accounting parameters for one in-memory tree.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Maximum slots per leaf before it splits (deleted slots count)
    pub leaf_capacity: usize,
    /// Log file that slot writes are attributed to
    pub slot_file: FileId,
    /// Log file that node writes are attributed to
    pub node_file: FileId,
}

impl TreeConfig {
    /// Config with the given leaf capacity and default files.
    pub fn with_capacity(leaf_capacity: usize) -> Self {
        Self {
            leaf_capacity,
            ..Self::default()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> SweepResult<()> {
        if self.leaf_capacity < 2 {
            return Err(SweepError::InvalidConfig {
                field: "leaf_capacity",
                reason: "must be >= 2 so a split leaves both halves populated".into(),
            });
        }
        if self.leaf_capacity > 4096 {
            return Err(SweepError::InvalidConfig {
                field: "leaf_capacity",
                reason: "must be <= 4096".into(),
            });
        }
        Ok(())
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: 128,
            slot_file: FileId(1),
            node_file: FileId(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(TreeConfig::default().validate().is_ok());
        assert!(TreeConfig::with_capacity(2).validate().is_ok());
    }

    #[test]
    fn test_capacity_bounds() {
        for bad in [0, 1, 5000] {
            match TreeConfig::with_capacity(bad).validate() {
                Err(SweepError::InvalidConfig { field, .. }) => assert_eq!(field, "leaf_capacity"),
                other => panic!("Expected InvalidConfig for {}, got {:?}", bad, other),
            }
        }
    }
}
