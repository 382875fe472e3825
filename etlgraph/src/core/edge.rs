//! Dependency edges between nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of coupling an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Consumer cannot compute without the producer's output from the same run.
    Data,
    /// Consumer reads the producer's output as reference data; tolerates staleness.
    Lookup,
    /// Ordering convention with no data coupling.
    Timing,
}

impl EdgeKind {
    /// How strongly the edge constrains ordering. Used when merging duplicates.
    #[must_use]
    pub fn strength(&self) -> u8 {
        match self {
            Self::Data => 3,
            Self::Lookup => 2,
            Self::Timing => 1,
        }
    }

    /// Order in which kinds are considered as break candidates.
    /// `None` for kinds that must never be broken.
    #[must_use]
    pub fn break_precedence(&self) -> Option<u8> {
        match self {
            Self::Lookup => Some(0),
            Self::Timing => Some(1),
            Self::Data => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "DATA"),
            Self::Lookup => write!(f, "LOOKUP"),
            Self::Timing => write!(f, "TIMING"),
        }
    }
}

/// How certain the graph builder is that an edge is real.
///
/// Variants are declared weakest first so the derived ordering ranks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Derived indirectly; weakest.
    Inferred,
    /// Name-only match on both sides.
    Low,
    /// Name match with one qualified side.
    Medium,
    /// Exact qualified match or explicit declaration.
    High,
}

impl Confidence {
    /// Numeric score in `[0, 1]`.
    #[must_use]
    pub fn score(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.7,
            Self::Low => 0.4,
            Self::Inferred => 0.2,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Inferred => write!(f, "inferred"),
        }
    }
}

/// A directed dependency: `from` must run before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Producer node id.
    pub from: String,
    /// Consumer node id.
    pub to: String,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Confidence in the edge.
    pub confidence: Confidence,
    /// Provenance strings, sorted and deduplicated.
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl Edge {
    /// Creates a new edge with a single piece of evidence.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: EdgeKind,
        confidence: Confidence,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            confidence,
            evidence: vec![evidence.into()],
        }
    }

    /// The `(from, to)` identity of the edge.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.from.clone(), self.to.clone())
    }

    /// Human-readable label, e.g. `C→A`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}→{}", self.from, self.to)
    }

    /// Merges a duplicate edge between the same pair into this one.
    ///
    /// The stronger kind wins, confidence keeps the maximum and all evidence
    /// is retained.
    pub fn absorb(&mut self, other: Self) {
        if other.kind.strength() > self.kind.strength() {
            self.kind = other.kind;
        }
        self.confidence = self.confidence.max(other.confidence);
        self.evidence.extend(other.evidence);
        self.evidence.sort();
        self.evidence.dedup();
    }
}
