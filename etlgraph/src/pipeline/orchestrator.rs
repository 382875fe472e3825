//! End-to-end pipeline runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::config::PipelineConfig;
use super::report::DependencyReport;
use crate::core::{has_blocking, Issue, Node, UnitDescriptor};
use crate::errors::{EtlGraphError, Result, ValidationFailureError};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::execution::{ExecutionReport, StageExecutor, UnitTask};
use crate::graph::{Cycle, CycleDetector, DependencyGraph, GraphBuilder};
use crate::loader;
use crate::observability::PhaseTimer;
use crate::planner::{ExecutionPlan, ExecutionPlanner};
use crate::resolution::{
    BreakDecision, CircuitBreaker, ConfidenceResolution, ConfidenceResolver, EvidenceSource,
    Observation, ResolutionEngine,
};

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// The graph as built from the descriptors.
    pub graph: DependencyGraph,
    /// The graph after break edges were removed. Plans refer to this one.
    pub planning_graph: DependencyGraph,
    /// Detected cycles.
    pub cycles: Vec<Cycle>,
    /// One decision per cycle.
    pub decisions: Vec<BreakDecision>,
    /// The plan; `None` when the run halted.
    pub plan: Option<ExecutionPlan>,
    /// Every issue raised, in order.
    pub issues: Vec<Issue>,
    /// The serializable report.
    pub report: DependencyReport,
}

impl PipelineOutcome {
    /// Returns true if the run stopped on a blocking issue.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.plan.is_none()
    }

    /// Returns true if any issue is blocking.
    #[must_use]
    pub fn has_blocking_issues(&self) -> bool {
        has_blocking(&self.issues)
    }

    /// Returns true if the plan relies on a break that needs review.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.plan.as_ref().is_some_and(|p| p.provisional)
    }
}

/// Builds, analyses and plans a set of units, and optionally executes the
/// plan.
///
/// The pipeline owns a [`CircuitBreaker`] shared by every retried operation
/// of a run. It is cleared when an execution finishes.
pub struct DependencyPipeline {
    config: PipelineConfig,
    event_sink: Arc<dyn EventSink>,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for DependencyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyPipeline")
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl Default for DependencyPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl DependencyPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let breaker = CircuitBreaker::new(config.circuit_breaker);
        Self {
            config,
            event_sink: Arc::new(NoOpEventSink),
            breaker,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The run-scoped circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Loads descriptors from a JSON file and runs them.
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<PipelineOutcome> {
        let units = loader::load_from_file(path)?;
        self.run(&units)
    }

    /// Builds the graph, resolves cycles and plans.
    ///
    /// Recoverable problems are returned as issues on the outcome; when any
    /// of them is blocking the run halts and no plan is produced.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, malformed descriptors
    /// or a planning graph that still contains a cycle.
    #[instrument(skip(self, units), fields(units = units.len()))]
    pub fn run(&self, units: &[UnitDescriptor]) -> Result<PipelineOutcome> {
        self.config.validate().map_err(EtlGraphError::Config)?;

        let timer = PhaseTimer::start("build");
        let graph = GraphBuilder::new().units(units.iter().cloned()).build()?;
        timer.finish();
        self.event_sink.try_emit(&PipelineEvent::GraphBuilt {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
        });

        let mut issues = self.review_ambiguous_inputs(&graph);
        issues.extend(self.review_variables(&graph));

        let timer = PhaseTimer::start("detect");
        let cycles = CycleDetector::new(self.config.max_cycle_length).detect(&graph);
        timer.finish();
        for cycle in &cycles {
            self.event_sink.try_emit(&PipelineEvent::CycleDetected {
                cycle: cycle.nodes.clone(),
                too_complex: cycle.too_complex,
            });
        }

        let timer = PhaseTimer::start("resolve");
        let resolution = ResolutionEngine::new()
            .with_strategy_overrides(self.config.strategy_overrides.clone())
            .with_apply_partial_breaks(self.config.apply_partial_breaks)
            .resolve(&graph, &cycles);
        timer.finish();
        for decision in &resolution.decisions {
            self.event_sink.try_emit(&PipelineEvent::CycleResolved {
                cycle: decision.cycle.nodes.clone(),
                status: decision.status,
                edge: decision.break_point.as_ref().map(|bp| bp.edge.label()),
            });
        }
        issues.extend(resolution.issues.iter().cloned());

        let plan = if has_blocking(&issues) {
            let blocking_issues = issues.iter().filter(|i| i.is_blocking()).count();
            warn!(blocking_issues, "Pipeline halted before planning");
            self.event_sink.try_emit(&PipelineEvent::PipelineHalted {
                reason: "blocking issues raised before planning".to_string(),
                blocking_issues,
            });
            None
        } else {
            let timer = PhaseTimer::start("plan");
            let mut plan = ExecutionPlanner::new().plan(&resolution.graph)?;
            timer.finish();
            plan.provisional = resolution.provisional;
            self.event_sink.try_emit(&PipelineEvent::PlanCreated {
                stages: plan.stage_count(),
                nodes: plan.node_count(),
                provisional: plan.provisional,
            });
            Some(plan)
        };

        let report = DependencyReport::new(&graph, &resolution.decisions, plan.as_ref(), &issues);

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            cycles = cycles.len(),
            issues = issues.len(),
            halted = plan.is_none(),
            "Pipeline run finished"
        );

        Ok(PipelineOutcome {
            graph,
            planning_graph: resolution.graph,
            cycles,
            decisions: resolution.decisions,
            plan,
            issues,
            report,
        })
    }

    /// Executes a planned outcome with `task`.
    ///
    /// The breaker is cleared afterwards so a later execution starts with
    /// fresh attempt counts.
    ///
    /// # Errors
    ///
    /// Returns a validation failure if the outcome halted and has no plan.
    pub async fn execute(
        &mut self,
        outcome: &PipelineOutcome,
        task: Arc<dyn UnitTask>,
    ) -> Result<ExecutionReport> {
        let Some(plan) = outcome.plan.as_ref() else {
            return Err(ValidationFailureError::new("Pipeline halted; there is no plan to execute").into());
        };

        let executor = StageExecutor::new(self.config.worker_pool_size)
            .with_failure_mode(self.config.failure_mode)
            .with_retry_failures(self.config.retry_failed_units)
            .with_event_sink(Arc::clone(&self.event_sink));

        let result = executor
            .execute(plan, &outcome.planning_graph, task, &mut self.breaker)
            .await;
        self.breaker.reset();
        result
    }

    /// Resolves an ambiguous mapping from supplied observations.
    #[must_use]
    pub fn resolve_mapping(&self, query: &str, observations: &[Observation]) -> ConfidenceResolution {
        ConfidenceResolver::new(self.config.confidence.clone()).resolve(query, observations)
    }

    /// Resolves an ambiguous mapping from an evidence source, through the
    /// pipeline's circuit breaker.
    pub async fn resolve_mapping_with_source(
        &mut self,
        query: &str,
        source: &dyn EvidenceSource,
    ) -> ConfidenceResolution {
        ConfidenceResolver::new(self.config.confidence.clone())
            .resolve_with_source(query, source, &mut self.breaker)
            .await
    }

    /// Name-only inputs written under more than one qualifier are scored by
    /// the confidence resolver. The edges stay; the issue asks for review.
    fn review_ambiguous_inputs(&self, graph: &DependencyGraph) -> Vec<Issue> {
        let resolver = ConfidenceResolver::new(self.config.confidence.clone());
        let mut issues = Vec::new();

        for consumer in graph.nodes() {
            for input in consumer.inputs.iter().filter(|t| !t.is_qualified()) {
                let mut candidates: BTreeMap<String, (u64, bool)> = BTreeMap::new();
                for producer in graph.nodes().filter(|n| n.id != consumer.id) {
                    for output in producer
                        .outputs
                        .iter()
                        .filter(|o| o.name() == input.name() && !o.has_variable())
                    {
                        let entry = candidates.entry(output.to_string()).or_default();
                        entry.0 += 1;
                        entry.1 |= output
                            .qualifier()
                            .is_some_and(|q| consumer_schemas(consumer).contains(q));
                    }
                }
                if candidates.len() < 2 {
                    continue;
                }

                let query = format!("{}:{input}", consumer.id);
                let observations: Vec<Observation> = candidates
                    .into_iter()
                    .map(|(mapping, (count, context_match))| {
                        Observation::new(mapping, count, context_match)
                    })
                    .collect();
                let resolution = resolver.resolve(&query, &observations);
                debug!(
                    query = %query,
                    status = %resolution.status,
                    best = resolution.mapping().unwrap_or("-"),
                    "Reviewed ambiguous input"
                );
                issues.push(resolution.issue);
            }
        }

        issues
    }

    /// `${VAR}` placeholders are scored against the concrete qualifiers
    /// seen elsewhere for the same table names, one query per variable.
    /// Edges through a placeholder stay at medium confidence.
    fn review_variables(&self, graph: &DependencyGraph) -> Vec<Issue> {
        let mut evidence: BTreeMap<String, BTreeMap<String, (u64, bool)>> = BTreeMap::new();

        for node in graph.nodes() {
            let schemas = consumer_schemas(node);
            for table in node.outputs.iter().chain(node.inputs.iter()) {
                for variable in table.variables() {
                    let candidates = evidence.entry(variable).or_default();
                    for seen in graph
                        .nodes()
                        .flat_map(|other| other.outputs.iter().chain(other.inputs.iter()))
                        .filter(|seen| seen.name() == table.name() && !seen.has_variable())
                    {
                        let Some(qualifier) = seen.qualifier() else {
                            continue;
                        };
                        let entry = candidates.entry(qualifier.to_string()).or_default();
                        entry.0 += 1;
                        entry.1 |= schemas.contains(qualifier);
                    }
                }
            }
        }

        let resolver = ConfidenceResolver::new(self.config.confidence.clone());
        evidence
            .into_iter()
            .map(|(variable, candidates)| {
                let query = format!("resolve-variable:{variable}");
                let observations: Vec<Observation> = candidates
                    .into_iter()
                    .map(|(mapping, (count, context_match))| {
                        Observation::new(mapping, count, context_match)
                    })
                    .collect();
                let resolution = resolver.resolve(&query, &observations);
                debug!(
                    query = %query,
                    status = %resolution.status,
                    best = resolution.best().map_or("-", |s| s.mapping.as_str()),
                    "Reviewed table variable"
                );
                resolution.issue
            })
            .collect()
    }
}

/// Concrete qualifiers the unit already works in.
fn consumer_schemas(node: &Node) -> BTreeSet<&str> {
    node.outputs
        .iter()
        .chain(node.inputs.iter())
        .filter(|t| !t.has_variable())
        .filter_map(|t| t.qualifier())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IssueCode, ResolutionStatus, Severity};
    use crate::events::CollectingEventSink;
    use crate::testing::fixtures;

    #[test]
    fn test_run_emits_phase_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = DependencyPipeline::default().with_event_sink(sink.clone());

        let outcome = pipeline.run(&fixtures::lookup_cycle()).unwrap();

        assert!(!outcome.halted());
        assert_eq!(
            sink.names(),
            vec!["graph.built", "cycle.detected", "cycle.resolved", "plan.created"]
        );
    }

    #[test]
    fn test_halted_run_has_no_plan() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = DependencyPipeline::default().with_event_sink(sink.clone());

        let outcome = pipeline.run(&fixtures::data_cycle(&["A", "B"])).unwrap();

        assert!(outcome.halted());
        assert!(outcome.has_blocking_issues());
        assert!(outcome.report.execution_order.is_none());
        assert_eq!(sink.names().last(), Some(&"pipeline.halted"));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let pipeline = DependencyPipeline::new(PipelineConfig::default().with_worker_pool_size(0));
        let err = pipeline.run(&fixtures::chain(&["A", "B"])).unwrap_err();
        assert!(matches!(err, EtlGraphError::Config(_)));
    }

    #[test]
    fn test_ambiguous_name_only_input_is_reviewed() {
        let units = vec![
            UnitDescriptor::transformation("load_sales").with_outputs(["sales.orders"]),
            UnitDescriptor::transformation("load_archive").with_outputs(["archive.orders"]),
            UnitDescriptor::transformation("summarize")
                .with_inputs(["orders"])
                .with_outputs(["sales.order_summary"]),
        ];

        let outcome = DependencyPipeline::default().run(&units).unwrap();

        let issue = outcome
            .issues
            .iter()
            .find(|i| i.subject == "summarize:orders")
            .unwrap();
        assert_ne!(issue.severity, Severity::Blocking);
        assert!(matches!(
            issue.code,
            IssueCode::ConfidenceTooLow | IssueCode::MappingResolved
        ));
        // Both candidate producers still feed the consumer.
        assert!(outcome.graph.has_edge("load_sales", "summarize"));
        assert!(outcome.graph.has_edge("load_archive", "summarize"));
        assert!(!outcome.halted());
    }

    #[test]
    fn test_table_variable_is_scored_once() {
        let units = vec![
            UnitDescriptor::transformation("adq_contracts")
                .with_inputs(["ekip.raw_contracts"])
                .with_outputs(["${EKIP_SCHEMA}.contracts"]),
            UnitDescriptor::transformation("mas_contracts").with_inputs(["ekip.contracts"]),
            UnitDescriptor::transformation("mas_contracts_hist")
                .with_inputs(["${EKIP_SCHEMA}.contracts"]),
        ];

        let outcome = DependencyPipeline::default().run(&units).unwrap();

        let variable_issues: Vec<_> = outcome
            .issues
            .iter()
            .filter(|i| i.subject == "resolve-variable:EKIP_SCHEMA")
            .collect();
        assert_eq!(variable_issues.len(), 1);
        assert_eq!(variable_issues[0].code, IssueCode::MappingResolved);

        let edge = outcome.graph.edge("adq_contracts", "mas_contracts").unwrap();
        assert_eq!(edge.confidence, crate::core::Confidence::Medium);
        assert!(outcome.graph.has_edge("adq_contracts", "mas_contracts_hist"));
        assert!(!outcome.halted());
    }

    #[test]
    fn test_resolve_mapping_uses_configured_thresholds() {
        let pipeline = DependencyPipeline::default();
        let resolution = pipeline.resolve_mapping(
            "TRANSACTIONS",
            &[Observation::new("X", 15, true), Observation::new("Y", 2, true)],
        );
        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(resolution.mapping(), Some("X"));
    }

    #[tokio::test]
    async fn test_execute_halted_outcome_fails() {
        let mut pipeline = DependencyPipeline::default();
        let outcome = pipeline.run(&fixtures::data_cycle(&["A", "B"])).unwrap();

        let task = Arc::new(crate::testing::mocks::RecordingTask::new());
        let err = pipeline.execute(&outcome, task).await.unwrap_err();
        assert!(matches!(err, EtlGraphError::ValidationFailure(_)));
    }
}
