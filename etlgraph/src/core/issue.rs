//! Issue records produced by every ambiguous or failed decision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an issue affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Stops the pipeline before the plan is handed downstream.
    Blocking,
    /// Attached to the output for human review; does not stop execution.
    Reviewable,
    /// Records an automatic decision.
    Informational,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::Reviewable => write!(f, "reviewable"),
            Self::Informational => write!(f, "informational"),
        }
    }
}

/// Stable issue codes.
///
/// The first five mirror the error taxonomy; the rest record automatic
/// decisions and task outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    /// Malformed or unknown-reference input.
    SchemaError,
    /// A cycle with no breakable edge, or too long to analyse.
    CycleUnresolvable,
    /// A mapping could not be resolved with enough confidence.
    ConfidenceTooLow,
    /// An operation hit its attempt ceiling.
    RetryLimitExceeded,
    /// A cycle survived resolution.
    ValidationFailure,
    /// A cycle edge was removed or proposed for removal.
    CycleBroken,
    /// A mapping was resolved automatically.
    MappingResolved,
    /// A unit task failed during plan execution.
    TaskFailed,
}

impl IssueCode {
    /// Stable string identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaError => "SCHEMA_ERROR",
            Self::CycleUnresolvable => "CYCLE_UNRESOLVABLE",
            Self::ConfidenceTooLow => "CONFIDENCE_TOO_LOW",
            Self::RetryLimitExceeded => "RETRY_LIMIT_EXCEEDED",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::CycleBroken => "CYCLE_BROKEN",
            Self::MappingResolved => "MAPPING_RESOLVED",
            Self::TaskFailed => "TASK_FAILED",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single issue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Severity.
    pub severity: Severity,
    /// Stable code.
    pub code: IssueCode,
    /// What the issue is about (node id, edge label, query key, operation key).
    pub subject: String,
    /// Human-readable description.
    pub message: String,
    /// What was done or proposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Which component applied the resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl Issue {
    /// Creates a new issue.
    #[must_use]
    pub fn new(
        severity: Severity,
        code: IssueCode,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code,
            subject: subject.into(),
            message: message.into(),
            resolution: None,
            resolved_by: None,
        }
    }

    /// Creates a blocking issue.
    #[must_use]
    pub fn blocking(code: IssueCode, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Blocking, code, subject, message)
    }

    /// Creates a reviewable issue.
    #[must_use]
    pub fn reviewable(code: IssueCode, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Reviewable, code, subject, message)
    }

    /// Creates an informational issue.
    #[must_use]
    pub fn informational(
        code: IssueCode,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Informational, code, subject, message)
    }

    /// Sets the resolution text.
    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Sets the resolving component.
    #[must_use]
    pub fn resolved_by(mut self, component: impl Into<String>) -> Self {
        self.resolved_by = Some(component.into());
        self
    }

    /// Returns true if the issue is blocking.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Returns true if any issue in the slice is blocking.
#[must_use]
pub fn has_blocking(issues: &[Issue]) -> bool {
    issues.iter().any(Issue::is_blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_code_stability() {
        assert_eq!(IssueCode::CycleUnresolvable.as_str(), "CYCLE_UNRESOLVABLE");
        assert_eq!(IssueCode::RetryLimitExceeded.as_str(), "RETRY_LIMIT_EXCEEDED");
        assert_eq!(
            serde_json::to_string(&IssueCode::SchemaError).unwrap(),
            r#""SCHEMA_ERROR""#
        );
    }

    #[test]
    fn test_issue_builder() {
        let issue = Issue::informational(IssueCode::CycleBroken, "C→A", "removed lookup edge")
            .with_resolution("use_stale_data")
            .resolved_by("resolution_engine");

        assert!(!issue.is_blocking());
        assert_eq!(issue.resolution.as_deref(), Some("use_stale_data"));
        assert_eq!(issue.resolved_by.as_deref(), Some("resolution_engine"));
    }

    #[test]
    fn test_has_blocking() {
        let issues = vec![
            Issue::reviewable(IssueCode::ConfidenceTooLow, "q", "low"),
            Issue::blocking(IssueCode::CycleUnresolvable, "a", "cycle"),
        ];
        assert!(has_blocking(&issues));
        assert!(!has_blocking(&issues[..1]));
    }

    #[test]
    fn test_optional_fields_skipped() {
        let issue = Issue::reviewable(IssueCode::ConfidenceTooLow, "q", "low");
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("resolution"));
        assert!(json.contains(r#""severity":"reviewable""#));
    }
}
