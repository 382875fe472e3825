//! Stage planning.
//!
//! Kahn's algorithm in waves: every node with no unscheduled predecessor
//! forms the next stage. Nodes in the same stage have no ordering
//! constraint between them and may run concurrently.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::errors::ValidationFailureError;
use crate::graph::DependencyGraph;

/// A set of nodes that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStage {
    /// Zero-based stage index.
    pub index: usize,
    /// Node ids, sorted.
    pub node_ids: Vec<String>,
}

impl PlanStage {
    /// One-based step number used in reports.
    #[must_use]
    pub fn step(&self) -> usize {
        self.index + 1
    }

    /// Number of nodes in the stage.
    #[must_use]
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    /// Returns true for a stage without nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Stages in execution order.
    pub stages: Vec<PlanStage>,
    /// Set when the plan relies on a break that still needs review.
    #[serde(default)]
    pub provisional: bool,
}

impl ExecutionPlan {
    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of scheduled nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.stages.iter().map(PlanStage::len).sum()
    }

    /// Returns true if no node is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stage index of a node.
    #[must_use]
    pub fn stage_of(&self, node_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .find(|stage| stage.node_ids.iter().any(|id| id == node_id))
            .map(|stage| stage.index)
    }

    /// Stage node lists, for comparisons.
    #[must_use]
    pub fn as_lists(&self) -> Vec<Vec<&str>> {
        self.stages
            .iter()
            .map(|stage| stage.node_ids.iter().map(String::as_str).collect())
            .collect()
    }

    /// Checks the plan against a graph: every node is scheduled exactly
    /// once, nothing unknown is scheduled and every edge points to a later
    /// stage.
    pub fn validate(&self, graph: &DependencyGraph) -> Result<(), ValidationFailureError> {
        let mut stage_of: BTreeMap<&str, usize> = BTreeMap::new();
        for stage in &self.stages {
            for id in &stage.node_ids {
                if stage_of.insert(id.as_str(), stage.index).is_some() {
                    return Err(ValidationFailureError::new(format!(
                        "Node '{id}' is scheduled more than once"
                    )));
                }
                if !graph.contains_node(id) {
                    return Err(ValidationFailureError::new(format!(
                        "Node '{id}' is scheduled but not in the graph"
                    )));
                }
            }
        }

        let missing: Vec<String> = graph
            .node_ids()
            .filter(|id| !stage_of.contains_key(id))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ValidationFailureError::new(format!(
                "Nodes not scheduled: {}",
                missing.join(", ")
            )));
        }

        for edge in graph.edges() {
            let (Some(from), Some(to)) = (
                stage_of.get(edge.from.as_str()),
                stage_of.get(edge.to.as_str()),
            ) else {
                continue;
            };
            if from >= to {
                return Err(ValidationFailureError::new(format!(
                    "Edge {} runs from stage {from} to stage {to}",
                    edge.label()
                )));
            }
        }

        Ok(())
    }
}

/// Computes [`ExecutionPlan`]s from acyclic graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPlanner;

impl ExecutionPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Plans the graph in waves.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationFailureError`] listing the nodes left over when
    /// a cycle survived resolution.
    pub fn plan(&self, graph: &DependencyGraph) -> Result<ExecutionPlan, ValidationFailureError> {
        let mut in_degree = graph.in_degrees();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut stages = Vec::new();

        while !ready.is_empty() {
            let current: Vec<&str> = std::mem::take(&mut ready).into_iter().collect();
            for id in &current {
                in_degree.remove(id);
                for next in graph.successors(id) {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(next);
                        }
                    }
                }
            }

            debug!(stage = stages.len(), nodes = current.len(), "Planned stage");
            stages.push(PlanStage {
                index: stages.len(),
                node_ids: current.into_iter().map(str::to_string).collect(),
            });
        }

        if !in_degree.is_empty() {
            let remaining: Vec<String> = in_degree.keys().map(|id| (*id).to_string()).collect();
            return Err(ValidationFailureError::surviving_cycle(remaining));
        }

        info!(
            stages = stages.len(),
            nodes = graph.node_count(),
            "Execution plan created"
        );
        Ok(ExecutionPlan {
            stages,
            provisional: false,
        })
    }
}
