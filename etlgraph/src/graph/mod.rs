//! Dependency graph construction and cycle detection.

mod builder;
mod cycles;
mod dependency_graph;

pub use builder::GraphBuilder;
pub use cycles::{Cycle, CycleDetector, DEFAULT_MAX_CYCLE_LENGTH};
pub use dependency_graph::DependencyGraph;
