//! Stage-by-stage plan execution.
//!
//! Units of one stage run concurrently on tokio, bounded by a semaphore.
//! The next stage starts only after every unit of the current one has
//! finished, including retries.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    FailureCollector, FailureMode, FailureRecord, FailureSummary, TaskOutcome, TaskStatus,
    UnitTask,
};
use crate::core::{Issue, IssueCode, Node, Severity};
use crate::errors::{EtlGraphError, Result};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::graph::DependencyGraph;
use crate::planner::ExecutionPlan;
use crate::resolution::{error_signature, CircuitBreaker};

const COMPONENT: &str = "stage_executor";

/// Default number of concurrently running units.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Result of executing a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
    /// One outcome per scheduled unit that was reached, in stage order.
    pub outcomes: Vec<TaskOutcome>,
    /// Issues raised by units, in stage order.
    pub issues: Vec<Issue>,
    /// Stages that ran to their barrier.
    pub stages_completed: usize,
    /// Zero-based index of the stage after which execution stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at_stage: Option<usize>,
    /// Failure summary.
    pub summary: FailureSummary,
}

impl ExecutionReport {
    /// Returns true if execution stopped before the last stage.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted_at_stage.is_some()
    }

    /// Returns true if every unit succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.halted() && self.outcomes.iter().all(TaskOutcome::is_success)
    }

    /// The outcome of a unit.
    #[must_use]
    pub fn outcome(&self, node_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.node_id == node_id)
    }

    /// Ids of the units that ran, in stage order.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status != TaskStatus::Skipped)
            .map(|o| o.node_id.as_str())
            .collect()
    }
}

/// Runs an [`ExecutionPlan`] with a bounded worker pool.
#[derive(Clone)]
pub struct StageExecutor {
    worker_pool_size: usize,
    failure_mode: FailureMode,
    retry_failures: bool,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageExecutor")
            .field("worker_pool_size", &self.worker_pool_size)
            .field("failure_mode", &self.failure_mode)
            .field("retry_failures", &self.retry_failures)
            .finish_non_exhaustive()
    }
}

impl Default for StageExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_POOL_SIZE)
    }
}

impl StageExecutor {
    /// Creates an executor running at most `worker_pool_size` units at once.
    #[must_use]
    pub fn new(worker_pool_size: usize) -> Self {
        Self {
            worker_pool_size: worker_pool_size.max(1),
            failure_mode: FailureMode::default(),
            retry_failures: true,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Whether failed units are retried while the circuit breaker allows.
    #[must_use]
    pub fn with_retry_failures(mut self, retry: bool) -> Self {
        self.retry_failures = retry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The worker pool size.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    /// Executes the plan.
    ///
    /// After a stage in which a unit reported a blocking issue, or failed
    /// under [`FailureMode::FailFast`], no further stage is scheduled.
    /// Failed units are retried until the breaker refuses: a repeat of the
    /// same failure, or the total-attempt ceiling whatever the failures.
    ///
    /// # Errors
    ///
    /// Returns a validation failure if the plan does not match the graph.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        graph: &DependencyGraph,
        task: Arc<dyn UnitTask>,
        breaker: &mut CircuitBreaker,
    ) -> Result<ExecutionReport> {
        plan.validate(graph)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut collector = FailureCollector::new(self.failure_mode);
        let mut outcomes = Vec::with_capacity(plan.node_count());
        let mut issues = Vec::new();
        let mut stages_completed = 0;
        let mut halted_at_stage = None;

        info!(%run_id, stages = plan.stage_count(), workers = self.worker_pool_size, "Executing plan");

        for stage in &plan.stages {
            self.event_sink.try_emit(&PipelineEvent::StageStarted {
                stage: stage.step(),
                node_ids: stage.node_ids.clone(),
            });
            debug!(%run_id, stage = stage.step(), units = stage.len(), "Stage started");

            let mut runnable = Vec::new();
            let mut skipped = 0;
            for id in &stage.node_ids {
                let Some(node) = graph.node(id) else {
                    continue;
                };
                if collector.can_run(&graph.predecessors(id)) {
                    runnable.push(node.clone());
                } else {
                    collector.record_skip(id);
                    outcomes.push(TaskOutcome::skipped(id.as_str(), stage.index));
                    skipped += 1;
                }
            }

            let stage_outcomes = self
                .run_stage(stage.index, runnable, &task, &semaphore, breaker)
                .await;

            let mut blocking = false;
            let (mut succeeded, mut failed) = (0, 0);
            for outcome in stage_outcomes {
                match outcome.status {
                    TaskStatus::Succeeded => {
                        succeeded += 1;
                        collector.record_completion(&outcome.node_id);
                    }
                    TaskStatus::Failed => {
                        failed += 1;
                        collector.record_failure(
                            FailureRecord::new(
                                outcome.node_id.as_str(),
                                outcome.error.clone().unwrap_or_default(),
                            )
                            .with_attempts(outcome.attempts),
                        );
                    }
                    TaskStatus::Skipped => {}
                }
                blocking |= outcome.has_blocking();
                issues.extend(outcome.issues.iter().cloned());
                outcomes.push(outcome);
            }

            stages_completed += 1;
            self.event_sink.try_emit(&PipelineEvent::StageCompleted {
                stage: stage.step(),
                succeeded,
                failed,
                skipped,
            });
            info!(%run_id, stage = stage.step(), succeeded, failed, skipped, "Stage completed");

            if blocking || collector.should_stop() {
                warn!(%run_id, stage = stage.step(), "Halting after stage");
                self.event_sink.try_emit(&PipelineEvent::PipelineHalted {
                    reason: format!("stage {} raised a blocking issue", stage.step()),
                    blocking_issues: issues.iter().filter(|i| i.is_blocking()).count(),
                });
                halted_at_stage = Some(stage.index);
                break;
            }
        }

        Ok(ExecutionReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            issues,
            stages_completed,
            halted_at_stage,
            summary: collector.summary(plan.node_count()),
        })
    }

    /// Runs one stage to its barrier, retrying failures the breaker allows.
    async fn run_stage(
        &self,
        stage: usize,
        nodes: Vec<Node>,
        task: &Arc<dyn UnitTask>,
        semaphore: &Arc<Semaphore>,
        breaker: &mut CircuitBreaker,
    ) -> Vec<TaskOutcome> {
        let mut finished = Vec::with_capacity(nodes.len());
        let mut attempts: BTreeMap<String, usize> = BTreeMap::new();
        let mut pending = nodes;

        while !pending.is_empty() {
            let results = run_batch(std::mem::take(&mut pending), task, semaphore).await;

            for (node, result, duration_ms) in results {
                let count = {
                    let entry = attempts.entry(node.id.clone()).or_default();
                    *entry += 1;
                    *entry
                };
                let key = format!("run:{}", node.id);

                match result {
                    Ok(task_issues) => {
                        breaker.record_success(&key);
                        finished.push(TaskOutcome {
                            node_id: node.id,
                            stage,
                            status: TaskStatus::Succeeded,
                            attempts: count,
                            duration_ms,
                            error: None,
                            issues: task_issues,
                        });
                    }
                    Err(err) => {
                        let message = err.to_string();
                        let signature = error_signature(&message);
                        breaker.record_failure(&key, &signature);

                        let refusal = breaker.check(&key, &signature).err();
                        if self.retry_failures && refusal.is_none() {
                            debug!(node = %node.id, attempt = count, error = %message, "Retrying unit");
                            pending.push(node);
                            continue;
                        }

                        let issue = self.failure_issue(
                            &node.id,
                            &message,
                            refusal.as_ref().map(ToString::to_string),
                        );
                        warn!(node = %node.id, attempts = count, error = %message, "Unit failed");
                        finished.push(TaskOutcome {
                            node_id: node.id,
                            stage,
                            status: TaskStatus::Failed,
                            attempts: count,
                            duration_ms,
                            error: Some(message),
                            issues: vec![issue],
                        });
                    }
                }
            }
        }

        finished.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        finished
    }

    fn failure_issue(&self, node_id: &str, message: &str, refusal: Option<String>) -> Issue {
        let severity = match self.failure_mode {
            FailureMode::FailFast => Severity::Blocking,
            FailureMode::ContinueOnFailure => Severity::Reviewable,
        };
        let issue = match refusal {
            Some(refusal) => Issue::new(
                severity,
                IssueCode::RetryLimitExceeded,
                node_id,
                format!("{refusal}: {message}"),
            ),
            None => Issue::new(
                severity,
                IssueCode::TaskFailed,
                node_id,
                format!("Unit '{node_id}' failed: {message}"),
            ),
        };
        issue.resolved_by(COMPONENT)
    }
}

type BatchResult = (Node, Result<Vec<Issue>>, f64);

/// Runs every node concurrently, at most as many at once as the semaphore
/// has permits. Results are sorted by node id.
async fn run_batch(
    nodes: Vec<Node>,
    task: &Arc<dyn UnitTask>,
    semaphore: &Arc<Semaphore>,
) -> Vec<BatchResult> {
    let mut running = FuturesUnordered::new();

    for node in nodes {
        let task = Arc::clone(task);
        let semaphore = Arc::clone(semaphore);
        let worker_node = node.clone();
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    return (
                        Err(EtlGraphError::Task(format!("worker pool closed: {err}"))),
                        0.0,
                    )
                }
            };
            let started = Instant::now();
            let result = task.run(&worker_node).await;
            (result, started.elapsed().as_secs_f64() * 1000.0)
        });
        running.push(async move { (node, handle.await) });
    }

    let mut results = Vec::new();
    while let Some((node, joined)) = running.next().await {
        match joined {
            Ok((result, duration_ms)) => results.push((node, result, duration_ms)),
            Err(err) => results.push((
                node,
                Err(EtlGraphError::Task(format!("unit task panicked: {err}"))),
                0.0,
            )),
        }
    }

    results.sort_by(|a, b| a.0.id.cmp(&b.0.id));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::planner::ExecutionPlanner;
    use crate::resolution::CircuitBreakerConfig;
    use crate::testing::fixtures;
    use crate::testing::mocks::{FailingTask, RecordingTask};

    fn setup(units: Vec<crate::core::UnitDescriptor>) -> (DependencyGraph, ExecutionPlan) {
        let graph = GraphBuilder::new().units(units).build().unwrap();
        let plan = ExecutionPlanner::new().plan(&graph).unwrap();
        (graph, plan)
    }

    #[tokio::test]
    async fn test_runs_stages_in_order() {
        let (graph, plan) = setup(fixtures::diamond());
        let task = Arc::new(RecordingTask::new());
        let mut breaker = CircuitBreaker::default();

        let report = StageExecutor::new(2)
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.stages_completed, 3);
        let order = task.started();
        assert_eq!(order[0], "A");
        assert_eq!(order[3], "D");
        assert_eq!(report.executed(), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_never_exceeds_worker_pool() {
        let ids: Vec<String> = (0..12).map(|i| format!("u{i:02}")).collect();
        let units = ids
            .iter()
            .map(|id| crate::core::UnitDescriptor::transformation(id.as_str()))
            .collect();
        let (graph, plan) = setup(units);
        let task = Arc::new(RecordingTask::new().with_delay_ms(20));
        let mut breaker = CircuitBreaker::default();

        StageExecutor::new(3)
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        assert_eq!(task.started().len(), 12);
        assert!(task.max_concurrency() <= 3);
        assert!(task.max_concurrency() >= 2);
    }

    #[tokio::test]
    async fn test_blocking_issue_halts_after_stage() {
        let (graph, plan) = setup(fixtures::diamond());
        let task = Arc::new(RecordingTask::new().with_blocking_issue_for("B"));
        let mut breaker = CircuitBreaker::default();

        let report = StageExecutor::default()
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        assert_eq!(report.halted_at_stage, Some(1));
        // C shares the stage with B and still finishes.
        assert!(report.outcome("C").unwrap().is_success());
        assert!(report.outcome("D").is_none());
        assert!(!task.started().contains(&"D".to_string()));
    }

    #[tokio::test]
    async fn test_failed_unit_retried_until_breaker_refuses() {
        let (graph, plan) = setup(fixtures::chain(&["A", "B"]));
        let task = Arc::new(FailingTask::new(["A"], "source table ekip missing"));
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        let report = StageExecutor::default()
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        let outcome = report.outcome("A").unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(task.calls("A"), 2);
        assert_eq!(report.issues[0].code, IssueCode::RetryLimitExceeded);
        assert!(report.issues[0].is_blocking());
        assert!(report.halted());
        assert_eq!(task.calls("B"), 0);
    }

    #[tokio::test]
    async fn test_changing_failures_stop_at_total_ceiling() {
        let (graph, plan) = setup(fixtures::chain(&["A", "B"]));
        let task = Arc::new(FailingTask::new(["A"], "connection reset").with_changing_message());
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        let report = StageExecutor::default()
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        let outcome = report.outcome("A").unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(task.calls("A"), breaker.max_total_attempts());
        assert_eq!(outcome.attempts, 5);
        assert_eq!(report.issues[0].code, IssueCode::RetryLimitExceeded);
        assert!(report.halted());
        assert_eq!(task.calls("B"), 0);
    }

    #[tokio::test]
    async fn test_no_retry_when_disabled() {
        let (graph, plan) = setup(fixtures::chain(&["A", "B"]));
        let task = Arc::new(FailingTask::new(["A"], "boom"));
        let mut breaker = CircuitBreaker::default();

        let report = StageExecutor::default()
            .with_retry_failures(false)
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        assert_eq!(task.calls("A"), 1);
        assert_eq!(report.issues[0].code, IssueCode::TaskFailed);
    }

    #[tokio::test]
    async fn test_continue_on_failure_skips_downstream() {
        let units = vec![
            crate::core::UnitDescriptor::transformation("A").with_outputs(["a"]),
            crate::core::UnitDescriptor::transformation("B").with_inputs(["a"]).with_outputs(["b"]),
            crate::core::UnitDescriptor::transformation("C").with_inputs(["b"]),
            crate::core::UnitDescriptor::transformation("X").with_outputs(["x"]),
            crate::core::UnitDescriptor::transformation("Y").with_inputs(["x"]),
        ];
        let (graph, plan) = setup(units);
        let task = Arc::new(FailingTask::new(["A"], "boom"));
        let mut breaker = CircuitBreaker::default();

        let report = StageExecutor::default()
            .with_failure_mode(FailureMode::ContinueOnFailure)
            .with_retry_failures(false)
            .execute(&plan, &graph, task.clone(), &mut breaker)
            .await
            .unwrap();

        assert!(!report.halted());
        assert_eq!(report.outcome("B").unwrap().status, TaskStatus::Skipped);
        assert_eq!(report.outcome("C").unwrap().status, TaskStatus::Skipped);
        assert!(report.outcome("Y").unwrap().is_success());
        assert_eq!(report.summary.skipped_nodes, 2);
        assert_eq!(report.issues[0].severity, Severity::Reviewable);
    }

    #[tokio::test]
    async fn test_emits_stage_events() {
        let (graph, plan) = setup(fixtures::chain(&["A", "B"]));
        let sink = Arc::new(crate::events::CollectingEventSink::new());
        let mut breaker = CircuitBreaker::default();

        StageExecutor::default()
            .with_event_sink(sink.clone())
            .execute(&plan, &graph, Arc::new(RecordingTask::new()), &mut breaker)
            .await
            .unwrap();

        assert_eq!(
            sink.names(),
            vec!["stage.started", "stage.completed", "stage.started", "stage.completed"]
        );
    }

    #[tokio::test]
    async fn test_rejects_plan_for_other_graph() {
        let (graph, _) = setup(fixtures::chain(&["A", "B"]));
        let (_, other_plan) = setup(fixtures::diamond());
        let mut breaker = CircuitBreaker::default();

        let err = StageExecutor::default()
            .execute(&other_plan, &graph, Arc::new(RecordingTask::new()), &mut breaker)
            .await
            .unwrap_err();
        assert!(matches!(err, EtlGraphError::ValidationFailure(_)));
    }
}
