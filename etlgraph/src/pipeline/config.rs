//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::{BreakStrategy, EdgeKind};
use crate::errors::{EtlGraphError, Result};
use crate::execution::{FailureMode, DEFAULT_WORKER_POOL_SIZE};
use crate::graph::DEFAULT_MAX_CYCLE_LENGTH;
use crate::resolution::{CircuitBreakerConfig, ConfidenceConfig};

fn default_max_cycle_length() -> usize {
    DEFAULT_MAX_CYCLE_LENGTH
}

fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}

fn default_true() -> bool {
    true
}

/// Tunable settings for a [`DependencyPipeline`](super::DependencyPipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Longest cycle enumerated before a component is reported as too complex.
    #[serde(default = "default_max_cycle_length")]
    pub max_cycle_length: usize,
    /// Remove `Partial` break edges from the planning graph and mark the
    /// plan provisional.
    #[serde(default = "default_true")]
    pub apply_partial_breaks: bool,
    /// Concurrently running units during execution.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// How unit failures affect the rest of the run.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Retry failed units while the circuit breaker allows.
    #[serde(default = "default_true")]
    pub retry_failed_units: bool,
    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Confidence resolver settings.
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    /// Break strategy per edge kind, replacing the defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub strategy_overrides: BTreeMap<EdgeKind, BreakStrategy>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_cycle_length: default_max_cycle_length(),
            apply_partial_breaks: true,
            worker_pool_size: default_worker_pool_size(),
            failure_mode: FailureMode::default(),
            retry_failed_units: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            confidence: ConfidenceConfig::default(),
            strategy_overrides: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(EtlGraphError::Config)?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Sets the cycle length bound.
    #[must_use]
    pub fn with_max_cycle_length(mut self, length: usize) -> Self {
        self.max_cycle_length = length;
        self
    }

    /// Sets whether partial breaks are applied.
    #[must_use]
    pub fn with_apply_partial_breaks(mut self, apply: bool) -> Self {
        self.apply_partial_breaks = apply;
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets whether failed units are retried.
    #[must_use]
    pub fn with_retry_failed_units(mut self, retry: bool) -> Self {
        self.retry_failed_units = retry;
        self
    }

    /// Sets the circuit breaker attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.circuit_breaker.max_attempts = max_attempts;
        self
    }

    /// Sets the ceiling on failed attempts of one operation, any failure.
    #[must_use]
    pub fn with_max_total_attempts(mut self, max_total_attempts: usize) -> Self {
        self.circuit_breaker.max_total_attempts = max_total_attempts;
        self
    }

    /// Sets the confidence resolver settings.
    #[must_use]
    pub fn with_confidence(mut self, confidence: ConfidenceConfig) -> Self {
        self.confidence = confidence;
        self
    }

    /// Overrides the break strategy for an edge kind.
    #[must_use]
    pub fn with_strategy_override(mut self, kind: EdgeKind, strategy: BreakStrategy) -> Self {
        self.strategy_overrides.insert(kind, strategy);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_cycle_length < 2 {
            return Err("max_cycle_length must be >= 2".to_string());
        }
        if self.worker_pool_size < 1 {
            return Err("worker_pool_size must be >= 1".to_string());
        }
        if self.strategy_overrides.contains_key(&EdgeKind::Data) {
            return Err("DATA edges cannot be broken; remove the DATA strategy override".to_string());
        }
        self.circuit_breaker.validate()?;
        self.confidence.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_cycle_length, 10);
        assert!(config.apply_partial_breaks);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.circuit_breaker.max_attempts, 2);
        assert_eq!(config.circuit_breaker.max_total_attempts, 5);
        assert!((config.confidence.resolved_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "max_cycle_length": 6,
                "confidence": {"ambiguity_margin": 0.1},
                "strategy_overrides": {"TIMING": "materialize_snapshot"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_cycle_length, 6);
        assert_eq!(config.worker_pool_size, 4);
        assert!((config.confidence.ambiguity_margin - 0.1).abs() < f64::EPSILON);
        assert!((config.confidence.partial_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            config.strategy_overrides.get(&EdgeKind::Timing),
            Some(&BreakStrategy::MaterializeSnapshot)
        );
    }

    #[test]
    fn test_validation_errors() {
        assert!(PipelineConfig::default().with_max_cycle_length(1).validate().is_err());
        assert!(PipelineConfig::default().with_worker_pool_size(0).validate().is_err());
        assert!(PipelineConfig::default().with_max_attempts(0).validate().is_err());
        assert!(PipelineConfig::default().with_max_attempts(6).validate().is_err());
        assert!(PipelineConfig::default()
            .with_strategy_override(EdgeKind::Data, BreakStrategy::Denormalize)
            .validate()
            .is_err());

        let err = PipelineConfig::from_json_str(r#"{"worker_pool_size": 0}"#).unwrap_err();
        assert!(matches!(err, EtlGraphError::Config(_)));
        let err = PipelineConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, EtlGraphError::Serialization(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etlgraph.json");
        std::fs::write(&path, r#"{"apply_partial_breaks": false}"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert!(!config.apply_partial_breaks);
    }
}
