//! Engine configuration.

use crate::errors::{ContractErrorInfo, EngineError, PipelineValidationError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which processing strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// One snapshot, one commit per pass.
    #[default]
    Atomic,
    /// One snapshot and one commit per stage, repeated until nothing changes.
    Legacy,
}

/// Configuration of a `ProcessingEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Processing strategy (default: atomic).
    pub strategy: StrategyKind,
    /// Fixpoint iteration ceiling; derived from the graph size when unset.
    pub max_iterations: Option<usize>,
    /// Commit attempts before giving up with a transient error (default: 3).
    pub max_commit_attempts: usize,
    /// Serialize passes on the same pipeline within this engine (default: true).
    pub exclusive_lease: bool,
    /// Base backoff between conflicting commits, in milliseconds (default: 10).
    pub conflict_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Atomic,
            max_iterations: None,
            max_commit_attempts: 3,
            exclusive_lease: true,
            conflict_backoff_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the iteration ceiling.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Sets the number of commit attempts.
    #[must_use]
    pub fn with_max_commit_attempts(mut self, attempts: usize) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    /// Enables or disables the per-pipeline lease.
    #[must_use]
    pub fn with_exclusive_lease(mut self, enabled: bool) -> Self {
        self.exclusive_lease = enabled;
        self
    }

    /// Sets the conflict backoff.
    #[must_use]
    pub fn with_conflict_backoff_ms(mut self, millis: u64) -> Self {
        self.conflict_backoff_ms = millis;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_commit_attempts < 1 {
            return Err("max_commit_attempts must be >= 1".to_string());
        }
        if self.max_iterations == Some(0) {
            return Err("max_iterations must be >= 1 when provided".to_string());
        }
        Ok(())
    }

    /// Returns a valid configuration: a zero iteration ceiling falls back to
    /// the derived one and zero commit attempts become one.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        if let Err(message) = self.validate() {
            warn!(error = %message, "Clamping invalid engine config");
        }
        self.max_commit_attempts = self.max_commit_attempts.max(1);
        self.max_iterations = self.max_iterations.filter(|&n| n > 0);
        self
    }

    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Serialization(e.to_string()))?;
        config.validate().map_err(|message| {
            PipelineValidationError::new(format!("Invalid engine config: {message}"))
                .with_error_info(ContractErrorInfo::new("CONFIG-001-INVALID", message))
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.strategy, StrategyKind::Atomic);
        assert_eq!(config.max_commit_attempts, 3);
        assert!(config.exclusive_lease);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json_str(r#"{"strategy": "legacy", "max_iterations": 50}"#)
            .unwrap();
        assert_eq!(
            config,
            EngineConfig::new()
                .with_strategy(StrategyKind::Legacy)
                .with_max_iterations(50)
        );
    }

    #[test]
    fn test_clamped() {
        let config = EngineConfig::new()
            .with_max_iterations(0)
            .with_max_commit_attempts(0)
            .clamped();
        assert_eq!(config.max_iterations, None);
        assert_eq!(config.max_commit_attempts, 1);
        assert!(config.validate().is_ok());

        let unset = EngineConfig::default().clamped();
        assert_eq!(unset, EngineConfig::default());
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(EngineError::Serialization(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"max_commit_attempts": 0}"#),
            Err(EngineError::Validation(_))
        ));
    }
}
