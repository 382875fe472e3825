//! # etlgraph
//!
//! Dependency analysis and run planning for sets of ETL units.
//!
//! etlgraph takes unit descriptors (transformations and orchestration jobs
//! with the tables they read and write) and produces a staged execution
//! plan:
//!
//! - **Graph building**: table overlaps and explicit calls become typed edges
//! - **Cycle detection**: strongly connected components and bounded enumeration
//! - **Cycle resolution**: risk-ranked break points by edge kind
//! - **Planning**: Kahn waves of units that may run concurrently
//! - **Execution**: a bounded worker pool with a circuit breaker on retries
//!
//! Problems that need a human are collected as issues with a severity
//! instead of aborting the run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use etlgraph::prelude::*;
//!
//! let units = loader::load_from_file("units.json")?;
//! let outcome = DependencyPipeline::default().run(&units)?;
//!
//! println!("{}", outcome.report.to_json()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod core;
pub mod errors;
pub mod events;
pub mod execution;
pub mod graph;
pub mod loader;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod resolution;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        BreakStrategy, Confidence, Edge, EdgeKind, Issue, IssueCode, Node, NodeKind,
        ResolutionStatus, RiskLevel, Severity, TableRef, UnitDescriptor,
    };
    pub use crate::errors::{
        CycleUnresolvableError, EtlGraphError, RetryLimitExceededError, SchemaError,
        ValidationFailureError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::execution::{ExecutionReport, FailureMode, StageExecutor, UnitTask};
    pub use crate::graph::{Cycle, CycleDetector, DependencyGraph, GraphBuilder};
    pub use crate::loader;
    pub use crate::pipeline::{DependencyPipeline, DependencyReport, PipelineConfig, PipelineOutcome};
    pub use crate::planner::{ExecutionPlan, ExecutionPlanner, PlanStage};
    pub use crate::resolution::{
        BreakDecision, CircuitBreaker, ConfidenceResolver, EvidenceSource, Observation,
        ResolutionEngine,
    };
}
