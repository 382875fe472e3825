//! Failure tolerance for plan execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How to handle unit failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Finish the current stage, then schedule nothing further (default).
    #[default]
    FailFast,
    /// Keep going, skipping every unit downstream of a failure.
    ContinueOnFailure,
}

/// Record of a unit failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Unit id.
    pub node_id: String,
    /// Last error message.
    pub error: String,
    /// Signature of the last error.
    pub error_signature: String,
    /// Attempts made, including retries.
    pub attempts: usize,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            node_id: node_id.into(),
            error_signature: crate::resolution::error_signature(&error),
            error,
            attempts: 1,
            failed_at: Utc::now(),
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Summary of failures during plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Units in the plan.
    pub total_nodes: usize,
    /// Units that succeeded.
    pub completed_nodes: usize,
    /// Units that failed.
    pub failed_nodes: usize,
    /// Units skipped because something upstream failed.
    pub skipped_nodes: usize,
    /// Failure records.
    pub failures: Vec<FailureRecord>,
}

impl FailureSummary {
    /// Fraction of units that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        self.completed_nodes as f64 / self.total_nodes as f64
    }

    /// Returns true if any failures occurred.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Collects failures and decides what may still run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    /// Failure mode.
    pub mode: FailureMode,
    failures: Vec<FailureRecord>,
    failed: BTreeSet<String>,
    completed: BTreeSet<String>,
    skipped: BTreeSet<String>,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Records a unit failure.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failed.insert(record.node_id.clone());
        self.failures.push(record);
    }

    /// Records a unit completion.
    pub fn record_completion(&mut self, node_id: &str) {
        self.completed.insert(node_id.to_string());
    }

    /// Records a unit that was not run.
    pub fn record_skip(&mut self, node_id: &str) {
        self.skipped.insert(node_id.to_string());
    }

    /// Returns true if the unit failed.
    #[must_use]
    pub fn has_failed(&self, node_id: &str) -> bool {
        self.failed.contains(node_id)
    }

    /// Returns true if no further stage should be scheduled.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        match self.mode {
            FailureMode::FailFast => !self.failures.is_empty(),
            FailureMode::ContinueOnFailure => false,
        }
    }

    /// Returns true if a unit with the given direct predecessors may run.
    ///
    /// Stages run in order, so checking direct predecessors against failed
    /// and skipped units covers everything upstream.
    #[must_use]
    pub fn can_run(&self, predecessors: &[&str]) -> bool {
        match self.mode {
            FailureMode::FailFast => self.failures.is_empty(),
            FailureMode::ContinueOnFailure => !predecessors
                .iter()
                .any(|id| self.failed.contains(*id) || self.skipped.contains(*id)),
        }
    }

    /// Creates a summary of the execution.
    #[must_use]
    pub fn summary(&self, total_nodes: usize) -> FailureSummary {
        FailureSummary {
            total_nodes,
            completed_nodes: self.completed.len(),
            failed_nodes: self.failed.len(),
            skipped_nodes: self.skipped.len(),
            failures: self.failures.clone(),
        }
    }

    /// Returns all failures.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mode_default() {
        assert_eq!(FailureMode::default(), FailureMode::FailFast);
        assert_eq!(
            serde_json::to_string(&FailureMode::ContinueOnFailure).unwrap(),
            r#""continue_on_failure""#
        );
    }

    #[test]
    fn test_failure_record_signature() {
        let a = FailureRecord::new("load_orders", "deadlock on page 4411");
        let b = FailureRecord::new("load_orders", "deadlock on page 17").with_attempts(2);
        assert_eq!(a.error_signature, b.error_signature);
        assert_eq!(b.attempts, 2);
    }

    #[test]
    fn test_collector_fail_fast() {
        let mut collector = FailureCollector::new(FailureMode::FailFast);
        assert!(!collector.should_stop());
        assert!(collector.can_run(&[]));

        collector.record_failure(FailureRecord::new("a", "boom"));

        assert!(collector.should_stop());
        assert!(collector.has_failed("a"));
        assert!(!collector.can_run(&[]));
    }

    #[test]
    fn test_collector_continue_on_failure() {
        let mut collector = FailureCollector::new(FailureMode::ContinueOnFailure);
        collector.record_failure(FailureRecord::new("a", "boom"));
        collector.record_skip("b");

        assert!(!collector.should_stop());
        assert!(!collector.can_run(&["a"]));
        assert!(!collector.can_run(&["b"]));
        assert!(collector.can_run(&["c"]));
    }

    #[test]
    fn test_summary() {
        let mut collector = FailureCollector::default();
        collector.record_completion("a");
        collector.record_completion("b");
        collector.record_failure(FailureRecord::new("c", "boom"));
        collector.record_skip("d");

        let summary = collector.summary(4);
        assert_eq!(summary.completed_nodes, 2);
        assert_eq!(summary.failed_nodes, 1);
        assert_eq!(summary.skipped_nodes, 1);
        assert!((summary.success_rate() - 0.5).abs() < 1e-9);
        assert!(summary.has_failures());
    }
}
