//! Resolution status, risk level and break strategy enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed outcome of any resolution attempt (cycle break or mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Resolved automatically; no human review needed.
    Resolved,
    /// A candidate exists but needs review before it can be trusted.
    Partial,
    /// No acceptable candidate exists.
    Unresolvable,
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Partial => write!(f, "partial"),
            Self::Unresolvable => write!(f, "unresolvable"),
        }
    }
}

impl ResolutionStatus {
    /// Returns true if the outcome can be used without review.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved)
    }
}

/// Risk of applying a cycle break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Safe to apply automatically.
    Low,
    /// Needs review.
    Medium,
    /// Needs review and explicit sign-off.
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// How a removed cycle edge is compensated for at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakStrategy {
    /// Consumer reads the previous run's output.
    UseStaleData,
    /// Run the cycle twice: load without the edge, then reload with it.
    TwoPassLoad,
    /// Snapshot the producer's output before the cycle starts.
    MaterializeSnapshot,
    /// Copy the referenced columns into the consumer's own tables.
    Denormalize,
}

impl BreakStrategy {
    /// Fixed risk of each strategy.
    #[must_use]
    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::UseStaleData => RiskLevel::Low,
            Self::TwoPassLoad | Self::MaterializeSnapshot => RiskLevel::Medium,
            Self::Denormalize => RiskLevel::High,
        }
    }

    /// Short description of what the strategy costs, used in review issues.
    #[must_use]
    pub fn trade_off(&self) -> &'static str {
        match self {
            Self::UseStaleData => "consumer reads reference data from the previous run",
            Self::TwoPassLoad => "affected units run twice; doubles load time for the cycle",
            Self::MaterializeSnapshot => {
                "requires an extra snapshot table and a refresh step before the cycle"
            }
            Self::Denormalize => {
                "changes the consumer's schema; duplicated columns can drift out of sync"
            }
        }
    }
}

impl fmt::Display for BreakStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseStaleData => write!(f, "use_stale_data"),
            Self::TwoPassLoad => write!(f, "two_pass_load"),
            Self::MaterializeSnapshot => write!(f, "materialize_snapshot"),
            Self::Denormalize => write!(f, "denormalize"),
        }
    }
}
