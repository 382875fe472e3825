//! Pipeline orchestration.
//!
//! This module provides:
//! - Configuration with JSON loading and validation
//! - The end-to-end run: build, detect, resolve, plan
//! - Optional execution of the plan
//! - The serializable dependency report

mod config;
mod orchestrator;
mod report;

pub use config::PipelineConfig;
pub use orchestrator::{DependencyPipeline, PipelineOutcome};
pub use report::{
    BreakPointEntry, CycleEntry, DependencyReport, EdgeEntry, IssueEntry, NodeEntry,
    ReportSummary, StepEntry,
};
