//! Pipeline events.
//!
//! Every phase boundary emits a [`PipelineEvent`] through an [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;

use crate::core::ResolutionStatus;

/// A phase boundary in a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PipelineEvent {
    /// The dependency graph was built.
    GraphBuilt {
        /// Node count.
        nodes: usize,
        /// Edge count after deduplication.
        edges: usize,
    },
    /// A cycle was found.
    CycleDetected {
        /// Node ids in walk order.
        cycle: Vec<String>,
        /// Longer than the enumeration bound.
        too_complex: bool,
    },
    /// A break decision was taken for a cycle.
    CycleResolved {
        /// Node ids in walk order.
        cycle: Vec<String>,
        /// Outcome.
        status: ResolutionStatus,
        /// Label of the chosen edge.
        #[serde(skip_serializing_if = "Option::is_none")]
        edge: Option<String>,
    },
    /// An execution plan was produced.
    PlanCreated {
        /// Stage count.
        stages: usize,
        /// Scheduled node count.
        nodes: usize,
        /// Relies on a break that needs review.
        provisional: bool,
    },
    /// The run stopped on a blocking issue.
    PipelineHalted {
        /// Why it stopped.
        reason: String,
        /// Number of blocking issues.
        blocking_issues: usize,
    },
    /// A plan stage started executing.
    StageStarted {
        /// One-based step.
        stage: usize,
        /// Units in the stage.
        node_ids: Vec<String>,
    },
    /// A plan stage finished executing.
    StageCompleted {
        /// One-based step.
        stage: usize,
        /// Units that succeeded.
        succeeded: usize,
        /// Units that failed.
        failed: usize,
        /// Units skipped.
        skipped: usize,
    },
}

impl PipelineEvent {
    /// Dotted event name, e.g. `graph.built`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GraphBuilt { .. } => "graph.built",
            Self::CycleDetected { .. } => "cycle.detected",
            Self::CycleResolved { .. } => "cycle.resolved",
            Self::PlanCreated { .. } => "plan.created",
            Self::PipelineHalted { .. } => "pipeline.halted",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
        }
    }

    /// Event fields as JSON.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
