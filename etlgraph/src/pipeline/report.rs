//! The dependency report document.
//!
//! Field names and enum spellings are part of the output contract. Every
//! collection is emitted in a fixed order so identical input produces
//! byte-identical JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{
    BreakStrategy, Confidence, EdgeKind, Issue, IssueCode, NodeKind, ResolutionStatus, RiskLevel,
    Severity,
};
use crate::errors::Result;
use crate::graph::DependencyGraph;
use crate::planner::ExecutionPlan;
use crate::resolution::BreakDecision;

/// A node in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node id.
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Normalized input tables, sorted.
    pub inputs: Vec<String>,
    /// Normalized output tables, sorted.
    pub outputs: Vec<String>,
}

/// An edge in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEntry {
    /// Producer.
    pub from: String,
    /// Consumer.
    pub to: String,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Confidence.
    pub confidence: Confidence,
}

/// The chosen break of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPointEntry {
    /// Edge label, e.g. `C→A`.
    pub edge: String,
    /// Strategy.
    pub strategy: BreakStrategy,
    /// Risk.
    pub risk_level: RiskLevel,
}

/// A detected cycle and its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEntry {
    /// Node ids in walk order.
    pub cycle: Vec<String>,
    /// Outcome.
    pub status: ResolutionStatus,
    /// Chosen break; `null` when unresolvable.
    pub break_point: Option<BreakPointEntry>,
    /// Reason.
    pub reason: String,
}

/// One step of the execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEntry {
    /// One-based step number.
    pub step: usize,
    /// Units runnable concurrently in this step.
    pub node_ids: Vec<String>,
}

/// An issue in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEntry {
    /// Severity.
    pub severity: Severity,
    /// Stable code.
    pub code: IssueCode,
    /// Subject.
    pub subject: String,
    /// Message.
    pub message: String,
    /// What was done or proposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Which component resolved it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

/// Report totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Nodes in the graph.
    pub total_nodes: usize,
    /// Steps in the execution order; 0 when halted.
    pub execution_steps: usize,
    /// Detected cycles.
    pub circular_dependencies_count: usize,
    /// The run stopped on a blocking issue.
    pub halted: bool,
    /// The plan relies on a break that needs review.
    pub provisional: bool,
}

/// The document handed to downstream tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Nodes, sorted by id.
    pub nodes: Vec<NodeEntry>,
    /// Edges, sorted by `(from, to)`.
    pub edges: Vec<EdgeEntry>,
    /// Cycles in detection order.
    pub circular_dependencies: Vec<CycleEntry>,
    /// Stages; absent when the run halted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<Vec<StepEntry>>,
    /// Issues in the order they were raised.
    pub issues: Vec<IssueEntry>,
    /// Totals.
    pub summary: ReportSummary,
}

impl DependencyReport {
    /// Assembles the report. `plan` is `None` when the run halted.
    #[must_use]
    pub fn new(
        graph: &DependencyGraph,
        decisions: &[BreakDecision],
        plan: Option<&ExecutionPlan>,
        issues: &[Issue],
    ) -> Self {
        let nodes = graph
            .nodes()
            .map(|node| NodeEntry {
                id: node.id.clone(),
                kind: node.kind,
                inputs: node.inputs.iter().map(ToString::to_string).collect(),
                outputs: node.outputs.iter().map(ToString::to_string).collect(),
            })
            .collect();

        let edges = graph
            .edges()
            .map(|edge| EdgeEntry {
                from: edge.from.clone(),
                to: edge.to.clone(),
                kind: edge.kind,
                confidence: edge.confidence,
            })
            .collect();

        let circular_dependencies = decisions
            .iter()
            .map(|decision| CycleEntry {
                cycle: decision.cycle.nodes.clone(),
                status: decision.status,
                break_point: decision.break_point.as_ref().map(|bp| BreakPointEntry {
                    edge: bp.edge.label(),
                    strategy: bp.strategy,
                    risk_level: bp.risk_level,
                }),
                reason: decision.reason.clone(),
            })
            .collect();

        let execution_order = plan.map(|plan| {
            plan.stages
                .iter()
                .map(|stage| StepEntry {
                    step: stage.step(),
                    node_ids: stage.node_ids.clone(),
                })
                .collect::<Vec<_>>()
        });

        let issues = issues
            .iter()
            .map(|issue| IssueEntry {
                severity: issue.severity,
                code: issue.code,
                subject: issue.subject.clone(),
                message: issue.message.clone(),
                resolution: issue.resolution.clone(),
                resolved_by: issue.resolved_by.clone(),
            })
            .collect();

        let summary = ReportSummary {
            total_nodes: graph.node_count(),
            execution_steps: plan.map_or(0, ExecutionPlan::stage_count),
            circular_dependencies_count: decisions.len(),
            halted: plan.is_none(),
            provisional: plan.is_some_and(|p| p.provisional),
        };

        Self {
            nodes,
            edges,
            circular_dependencies,
            execution_order,
            issues,
            summary,
        }
    }

    /// Returns true if the run stopped before producing a plan.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.summary.halted
    }

    /// Returns true if any issue is blocking.
    #[must_use]
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Blocking)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the pretty-printed JSON to a file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }
}
