//! Configuration for the compressor
//!
//! Provides presets for the usual deployment shapes and validation for
//! custom configurations.

use std::time::Duration;

use crate::error::{SweepError, SweepResult};

/// Compressor configuration with presets
#[derive(Debug, Clone)]
pub struct Config {
    /// How long the daemon sleeps between passes when nobody wakes it
    pub wakeup_interval: Duration,
    /// Whether the owning store should start the background daemon
    pub run_daemon: bool,
}

impl Config {
    /// Long-running server: daemon on, five second cadence
    pub fn server() -> Self {
        Self {
            wakeup_interval: Duration::from_secs(5),
            run_daemon: true,
        }
    }

    /// Latency-sensitive embedding: daemon on, short cadence so emptied
    /// leaves are pruned quickly
    pub fn interactive() -> Self {
        Self {
            wakeup_interval: Duration::from_millis(250),
            run_daemon: true,
        }
    }

    /// No daemon; the embedding application calls `run_pass` itself and
    /// relies on lazy compression in between
    pub fn manual() -> Self {
        Self {
            wakeup_interval: Duration::from_secs(5),
            run_daemon: false,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> SweepResult<()> {
        if self.wakeup_interval.is_zero() {
            return Err(SweepError::InvalidConfig {
                field: "wakeup_interval",
                reason: "must be > 0".into(),
            });
        }
        if self.wakeup_interval > Duration::from_secs(24 * 60 * 60) {
            return Err(SweepError::InvalidConfig {
                field: "wakeup_interval",
                reason: "must be at most one day".into(),
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::server() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_valid() {
        assert!(Config::server().validate().is_ok());
        assert!(Config::interactive().validate().is_ok());
        assert!(Config::manual().validate().is_ok());
    }

    #[test]
    fn test_preset_ordering() {
        assert!(Config::interactive().wakeup_interval < Config::server().wakeup_interval);
        assert!(!Config::manual().run_daemon);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.wakeup_interval = Duration::ZERO;
        match config.validate() {
            Err(SweepError::InvalidConfig { field, .. }) => assert_eq!(field, "wakeup_interval"),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }
}
