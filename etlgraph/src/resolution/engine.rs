//! Risk-classified cycle breaking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::{BreakStrategy, Edge, EdgeKind, Issue, IssueCode, ResolutionStatus, RiskLevel};
use crate::errors::CycleUnresolvableError;
use crate::graph::{Cycle, DependencyGraph};

const COMPONENT: &str = "resolution_engine";

/// Reason recorded for cycles made only of DATA edges.
pub const REASON_ALL_DATA: &str = "all edges are DATA dependencies";

/// Reason recorded for cycles longer than the detection bound.
pub const REASON_TOO_COMPLEX: &str = "cycle too complex";

/// The edge chosen to break a cycle and how the break is compensated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPoint {
    /// The edge to remove.
    pub edge: Edge,
    /// Compensation strategy.
    pub strategy: BreakStrategy,
    /// Risk of the strategy.
    pub risk_level: RiskLevel,
}

/// The decision taken for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakDecision {
    /// The cycle.
    pub cycle: Cycle,
    /// Outcome.
    pub status: ResolutionStatus,
    /// The chosen break; absent when unresolvable.
    pub break_point: Option<BreakPoint>,
    /// Human-readable reason.
    pub reason: String,
    /// Whether the edge was removed from the planning graph.
    pub applied: bool,
}

impl BreakDecision {
    /// The removed (or proposed) edge.
    #[must_use]
    pub fn removed_edge(&self) -> Option<&Edge> {
        self.break_point.as_ref().map(|bp| &bp.edge)
    }

    /// The strategy of the break, if any.
    #[must_use]
    pub fn strategy(&self) -> Option<BreakStrategy> {
        self.break_point.as_ref().map(|bp| bp.strategy)
    }

    /// The risk of the break, if any.
    #[must_use]
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.break_point.as_ref().map(|bp| bp.risk_level)
    }

    /// The error form of an unresolvable decision.
    #[must_use]
    pub fn to_error(&self) -> Option<CycleUnresolvableError> {
        (self.status == ResolutionStatus::Unresolvable)
            .then(|| CycleUnresolvableError::new(self.cycle.closed_path(), self.reason.clone()))
    }
}

/// Result of resolving every detected cycle.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    /// The working graph with applied breaks removed.
    pub graph: DependencyGraph,
    /// One decision per detected cycle, in cycle order.
    pub decisions: Vec<BreakDecision>,
    /// Issues raised by the decisions.
    pub issues: Vec<Issue>,
    /// Set when a `Partial` break was applied.
    pub provisional: bool,
}

impl ResolutionOutcome {
    /// Returns true if any cycle could not be broken.
    #[must_use]
    pub fn has_unresolvable(&self) -> bool {
        self.decisions
            .iter()
            .any(|d| d.status == ResolutionStatus::Unresolvable)
    }
}

/// Chooses and applies break points for detected cycles.
#[derive(Debug, Clone)]
pub struct ResolutionEngine {
    strategy_overrides: BTreeMap<EdgeKind, BreakStrategy>,
    apply_partial_breaks: bool,
}

impl Default for ResolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionEngine {
    /// Creates an engine with the default strategy mapping.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategy_overrides: BTreeMap::new(),
            apply_partial_breaks: true,
        }
    }

    /// Overrides the strategy used for an edge kind. DATA edges are never
    /// broken, so an override for them is ignored.
    #[must_use]
    pub fn with_strategy_override(mut self, kind: EdgeKind, strategy: BreakStrategy) -> Self {
        self.strategy_overrides.insert(kind, strategy);
        self
    }

    /// Sets several overrides at once.
    #[must_use]
    pub fn with_strategy_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (EdgeKind, BreakStrategy)>,
    ) -> Self {
        self.strategy_overrides.extend(overrides);
        self
    }

    /// Whether `Partial` breaks are removed from the planning graph.
    #[must_use]
    pub fn with_apply_partial_breaks(mut self, apply: bool) -> Self {
        self.apply_partial_breaks = apply;
        self
    }

    /// The strategy for breaking an edge of the given kind.
    #[must_use]
    pub fn strategy_for(&self, kind: EdgeKind) -> Option<BreakStrategy> {
        match kind {
            EdgeKind::Data => None,
            EdgeKind::Lookup => Some(
                self.strategy_overrides
                    .get(&kind)
                    .copied()
                    .unwrap_or(BreakStrategy::UseStaleData),
            ),
            EdgeKind::Timing => Some(
                self.strategy_overrides
                    .get(&kind)
                    .copied()
                    .unwrap_or(BreakStrategy::TwoPassLoad),
            ),
        }
    }

    /// Resolves the cycles against a working copy of `graph`.
    ///
    /// Cycles are handled in sorted order. A cycle already broken by an
    /// earlier removal reuses that break and raises no new issue.
    #[must_use]
    pub fn resolve(&self, graph: &DependencyGraph, cycles: &[Cycle]) -> ResolutionOutcome {
        let mut working = graph.clone();
        let mut decisions = Vec::with_capacity(cycles.len());
        let mut issues = Vec::new();
        let mut provisional = false;
        let mut removed: BTreeMap<(String, String), (ResolutionStatus, BreakPoint)> =
            BTreeMap::new();

        let mut ordered: Vec<&Cycle> = cycles.iter().collect();
        ordered.sort_by(|a, b| a.nodes.cmp(&b.nodes));

        for cycle in ordered {
            if cycle.too_complex {
                warn!(cycle = %cycle.label(), length = cycle.len(), "Cycle too complex to resolve");
                issues.push(Self::unresolvable_issue(cycle, REASON_TOO_COMPLEX));
                decisions.push(Self::unresolvable(cycle, REASON_TOO_COMPLEX));
                continue;
            }

            if !cycle.is_intact(&working) {
                let earlier = cycle
                    .edges
                    .iter()
                    .find_map(|edge| removed.get(&edge.key()));
                if let Some((status, break_point)) = earlier {
                    debug!(
                        cycle = %cycle.label(),
                        edge = %break_point.edge.label(),
                        "Cycle already broken by earlier removal"
                    );
                    decisions.push(BreakDecision {
                        cycle: cycle.clone(),
                        status: *status,
                        break_point: Some(break_point.clone()),
                        reason: format!("already broken by removal of {}", break_point.edge.label()),
                        applied: true,
                    });
                    continue;
                }
            }

            let Some(break_point) = self.choose_break(cycle) else {
                warn!(cycle = %cycle.label(), "Cycle has only DATA edges");
                issues.push(Self::unresolvable_issue(cycle, REASON_ALL_DATA));
                decisions.push(Self::unresolvable(cycle, REASON_ALL_DATA));
                continue;
            };

            let edge_label = break_point.edge.label();
            let trade_off = break_point.strategy.trade_off();
            let (status, issue, reason) = match break_point.risk_level {
                RiskLevel::Low => (
                    ResolutionStatus::Resolved,
                    Issue::informational(
                        IssueCode::CycleBroken,
                        edge_label.as_str(),
                        format!(
                            "Removed {} edge {edge_label} to break cycle {}",
                            break_point.edge.kind,
                            cycle.label()
                        ),
                    ),
                    format!("{} edge removed; {trade_off}", break_point.edge.kind),
                ),
                RiskLevel::Medium => (
                    ResolutionStatus::Partial,
                    Issue::reviewable(
                        IssueCode::CycleBroken,
                        edge_label.as_str(),
                        format!(
                            "Breaking {edge_label} in cycle {} needs review: {trade_off}",
                            cycle.label()
                        ),
                    ),
                    format!("{} edge proposed for removal; {trade_off}", break_point.edge.kind),
                ),
                RiskLevel::High => (
                    ResolutionStatus::Partial,
                    Issue::reviewable(
                        IssueCode::CycleBroken,
                        edge_label.as_str(),
                        format!(
                            "HIGH RISK: breaking {edge_label} in cycle {} requires sign-off: {trade_off}",
                            cycle.label()
                        ),
                    ),
                    format!(
                        "high-risk {} edge proposed for removal; {trade_off}",
                        break_point.edge.kind
                    ),
                ),
            };

            let applied = status == ResolutionStatus::Resolved || self.apply_partial_breaks;
            if applied {
                working.remove_edge(&break_point.edge.from, &break_point.edge.to);
                removed.insert(break_point.edge.key(), (status, break_point.clone()));
                if status == ResolutionStatus::Partial {
                    provisional = true;
                }
            }

            info!(
                cycle = %cycle.label(),
                edge = %edge_label,
                strategy = %break_point.strategy,
                risk = %break_point.risk_level,
                %status,
                applied,
                "Cycle break decided"
            );

            issues.push(
                issue
                    .with_resolution(break_point.strategy.to_string())
                    .resolved_by(COMPONENT),
            );
            decisions.push(BreakDecision {
                cycle: cycle.clone(),
                status,
                break_point: Some(break_point),
                reason,
                applied,
            });
        }

        ResolutionOutcome {
            graph: working,
            decisions,
            issues,
            provisional,
        }
    }

    /// Picks the lowest-risk breakable edge. Ties go to LOOKUP over TIMING,
    /// then to the lowest confidence, then to the smallest `(from, to)`.
    fn choose_break(&self, cycle: &Cycle) -> Option<BreakPoint> {
        cycle
            .edges
            .iter()
            .filter_map(|edge| {
                let precedence = edge.kind.break_precedence()?;
                let strategy = self.strategy_for(edge.kind)?;
                Some((strategy.risk(), precedence, edge, strategy))
            })
            .min_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.confidence.cmp(&b.2.confidence))
                    .then_with(|| a.2.key().cmp(&b.2.key()))
            })
            .map(|(risk_level, _, edge, strategy)| BreakPoint {
                edge: edge.clone(),
                strategy,
                risk_level,
            })
    }

    fn unresolvable(cycle: &Cycle, reason: &str) -> BreakDecision {
        BreakDecision {
            cycle: cycle.clone(),
            status: ResolutionStatus::Unresolvable,
            break_point: None,
            reason: reason.to_string(),
            applied: false,
        }
    }

    fn unresolvable_issue(cycle: &Cycle, reason: &str) -> Issue {
        Issue::blocking(
            IssueCode::CycleUnresolvable,
            cycle.label(),
            format!("Circular dependency {} cannot be broken: {reason}", cycle.label()),
        )
        .resolved_by(COMPONENT)
    }
}
