//! Error types for etlgraph.
//!
//! Fatal conditions (`SCHEMA_ERROR`, `VALIDATION_FAILURE`) surface as `Err`
//! values. Recoverable conditions are normally reported as [`Issue`]s, but
//! each one also has an error type here so callers that want to fail hard on
//! them can convert.
//!
//! [`Issue`]: crate::core::Issue

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::IssueCode;

/// The main error type for etlgraph operations.
#[derive(Debug, Error)]
pub enum EtlGraphError {
    /// Malformed input or a reference to an unknown unit.
    #[error("{0}")]
    Schema(#[from] SchemaError),

    /// A cycle that cannot be broken.
    #[error("{0}")]
    CycleUnresolvable(#[from] CycleUnresolvableError),

    /// A mapping below the confidence threshold.
    #[error("Confidence too low for '{query}': best score {score:.3}")]
    ConfidenceTooLow {
        /// The query key.
        query: String,
        /// Best score observed.
        score: f64,
    },

    /// An operation refused by the circuit breaker.
    #[error("{0}")]
    RetryLimitExceeded(#[from] RetryLimitExceededError),

    /// A cycle survived into planning.
    #[error("{0}")]
    ValidationFailure(#[from] ValidationFailureError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A unit task could not be run.
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlGraphError {
    /// The issue code matching this error, for errors in the taxonomy.
    #[must_use]
    pub fn issue_code(&self) -> Option<IssueCode> {
        match self {
            Self::Schema(_) => Some(IssueCode::SchemaError),
            Self::CycleUnresolvable(_) => Some(IssueCode::CycleUnresolvable),
            Self::ConfidenceTooLow { .. } => Some(IssueCode::ConfidenceTooLow),
            Self::RetryLimitExceeded(_) => Some(IssueCode::RetryLimitExceeded),
            Self::ValidationFailure(_) => Some(IssueCode::ValidationFailure),
            Self::Config(_) | Self::Task(_) | Self::Serialization(_) | Self::Io(_) => None,
        }
    }

    /// Returns true if the error must halt the run before any output.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ConfidenceTooLow { .. } | Self::RetryLimitExceeded(_) | Self::Task(_)
        )
    }
}

/// Structured metadata attached to errors for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Stable error code, e.g. `SCHEMA_ERROR`.
    pub code: String,
    /// Short summary.
    pub summary: String,
    /// How to fix it.
    pub fix_hint: Option<String>,
    /// Additional context.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: IssueCode, summary: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised for malformed descriptors or unknown references.
#[derive(Debug, Clone, Error)]
#[error("Schema error: {message}")]
pub struct SchemaError {
    /// The error message.
    pub message: String,
    /// Units involved.
    pub units: Vec<String>,
    /// Error info.
    pub error_info: ErrorInfo,
}

impl SchemaError {
    /// Creates a new schema error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ErrorInfo::new(IssueCode::SchemaError, message.clone()),
            message,
            units: Vec::new(),
        }
    }

    /// Reference to a unit id that is not in the input set.
    #[must_use]
    pub fn unknown_unit(referrer: &str, missing: &str) -> Self {
        let mut err = Self::new(format!(
            "Unit '{referrer}' references unknown unit '{missing}'"
        ))
        .with_units(vec![referrer.to_string(), missing.to_string()]);
        err.error_info = err
            .error_info
            .with_fix_hint("Check the explicit calls of the unit for typos or a missing descriptor.");
        err
    }

    /// Two descriptors share an id.
    #[must_use]
    pub fn duplicate_unit(id: &str) -> Self {
        Self::new(format!("Duplicate unit id '{id}'")).with_units(vec![id.to_string()])
    }

    /// Sets the units involved.
    #[must_use]
    pub fn with_units(mut self, units: Vec<String>) -> Self {
        self.units = units;
        self
    }
}

/// Raised when a cycle has no breakable edge.
#[derive(Debug, Clone, Error)]
#[error("Unresolvable cycle {}: {reason}", cycle_path.join(" -> "))]
pub struct CycleUnresolvableError {
    /// The nodes forming the cycle, first node repeated at the end.
    pub cycle_path: Vec<String>,
    /// Why it could not be broken.
    pub reason: String,
}

impl CycleUnresolvableError {
    /// Creates a new error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            cycle_path,
            reason: reason.into(),
        }
    }
}

/// Raised when the circuit breaker refuses to dispatch an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Retry limit exceeded for '{operation_key}' after {attempts} failed attempts")]
pub struct RetryLimitExceededError {
    /// The refused operation.
    pub operation_key: String,
    /// Failed attempts already made.
    pub attempts: usize,
    /// Signature of the most recent failure.
    pub error_signature: String,
}

/// Raised when nodes remain after planning: a cycle survived resolution.
#[derive(Debug, Clone, Error)]
#[error("Validation failure: {message}")]
pub struct ValidationFailureError {
    /// The error message.
    pub message: String,
    /// Nodes left unscheduled.
    pub remaining: Vec<String>,
    /// Error info.
    pub error_info: ErrorInfo,
}

impl ValidationFailureError {
    /// Creates a new validation failure for the unscheduled nodes.
    #[must_use]
    pub fn surviving_cycle(remaining: Vec<String>) -> Self {
        let message = format!(
            "{} node(s) still on a cycle after resolution: {}",
            remaining.len(),
            remaining.join(", ")
        );
        Self {
            error_info: ErrorInfo::new(IssueCode::ValidationFailure, message.clone())
                .with_fix_hint("A cycle was not removed before planning; this indicates a resolution bug."),
            message,
            remaining,
        }
    }

    /// Creates a plan validation failure with a custom message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ErrorInfo::new(IssueCode::ValidationFailure, message.clone()),
            message,
            remaining: Vec::new(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = EtlGraphError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new(IssueCode::SchemaError, "bad input")
            .with_fix_hint("fix it")
            .with_context_entry("unit", "a");

        assert_eq!(info.code, "SCHEMA_ERROR");
        assert_eq!(info.fix_hint.as_deref(), Some("fix it"));
        assert_eq!(info.context.get("unit").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_unknown_unit_error() {
        let err = SchemaError::unknown_unit("wf_daily", "missing_job");
        assert!(err.to_string().contains("unknown unit 'missing_job'"));
        assert_eq!(err.units, vec!["wf_daily", "missing_job"]);
        assert!(err.error_info.fix_hint.is_some());

        let err: EtlGraphError = err.into();
        assert_eq!(err.issue_code(), Some(IssueCode::SchemaError));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_cycle_unresolvable_message() {
        let err = CycleUnresolvableError::new(
            vec!["a".into(), "b".into(), "a".into()],
            "all edges are DATA dependencies",
        );
        assert_eq!(
            err.to_string(),
            "Unresolvable cycle a -> b -> a: all edges are DATA dependencies"
        );
    }

    #[test]
    fn test_retry_limit_not_fatal() {
        let err: EtlGraphError = RetryLimitExceededError {
            operation_key: "fix:missing-source:ekip".into(),
            attempts: 2,
            error_signature: "abc".into(),
        }
        .into();
        assert!(!err.is_fatal());
        assert_eq!(err.issue_code(), Some(IssueCode::RetryLimitExceeded));
    }

    #[test]
    fn test_validation_failure() {
        let err = ValidationFailureError::surviving_cycle(vec!["a".into(), "b".into()]);
        assert_eq!(err.remaining.len(), 2);
        assert_eq!(err.error_info.code, "VALIDATION_FAILURE");
    }
}
