//! Plan execution with a bounded worker pool.

mod executor;
mod failure;
mod task;

pub use executor::{ExecutionReport, StageExecutor, DEFAULT_WORKER_POOL_SIZE};
pub use failure::{FailureCollector, FailureMode, FailureRecord, FailureSummary};
pub use task::{TaskOutcome, TaskStatus, UnitTask};
