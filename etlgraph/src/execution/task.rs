//! The unit of work run by the executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Issue, Node};
use crate::errors::Result;

/// Runs one unit of the plan.
///
/// A task returns the issues it raised. A blocking issue does not fail the
/// unit but stops the executor from scheduling further stages.
#[async_trait]
pub trait UnitTask: Send + Sync {
    /// Runs the unit.
    async fn run(&self, node: &Node) -> Result<Vec<Issue>>;
}

/// Final state of a unit after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The unit ran to completion.
    Succeeded,
    /// The unit failed on its last attempt.
    Failed,
    /// The unit was not run because something upstream failed.
    Skipped,
}

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Unit id.
    pub node_id: String,
    /// Stage index the unit belongs to.
    pub stage: usize,
    /// Final status.
    pub status: TaskStatus,
    /// Attempts made.
    pub attempts: usize,
    /// Wall time of the last attempt in milliseconds.
    pub duration_ms: f64,
    /// Error of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Issues reported by the unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl TaskOutcome {
    /// Creates a skipped outcome.
    #[must_use]
    pub fn skipped(node_id: impl Into<String>, stage: usize) -> Self {
        Self {
            node_id: node_id.into(),
            stage,
            status: TaskStatus::Skipped,
            attempts: 0,
            duration_ms: 0.0,
            error: None,
            issues: Vec::new(),
        }
    }

    /// Returns true if the unit succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// Returns true if the unit reported a blocking issue.
    #[must_use]
    pub fn has_blocking(&self) -> bool {
        crate::core::has_blocking(&self.issues)
    }
}
