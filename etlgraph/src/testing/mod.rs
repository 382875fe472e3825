//! Testing utilities for etlgraph.
//!
//! This module provides:
//! - Descriptor fixtures for common graph shapes
//! - Mock unit tasks and evidence sources
//! - Assertions for plans, issues and cycle decisions

pub mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::{
    assert_decision, assert_has_issue, assert_no_blocking_issues, assert_plan_stages,
};
pub use mocks::{FailingTask, MockEvidenceSource, RecordingTask};
