//! Core domain model types.
//!
//! This module contains the data model shared by every phase:
//! - Unit descriptors, table references and nodes
//! - Dependency edges with kind and confidence
//! - Issues and severities
//! - Resolution status, risk and break strategy enums

mod edge;
mod issue;
mod node;
mod status;

pub use edge::{Confidence, Edge, EdgeKind};
pub use issue::{has_blocking, Issue, IssueCode, Severity};
pub use node::{Node, NodeKind, TableRef, UnitDescriptor};
pub use status::{BreakStrategy, ResolutionStatus, RiskLevel};
