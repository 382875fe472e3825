//! Confidence-scored resolution of ambiguous mappings.
//!
//! A query (a variable, a table reference, a function classification) comes
//! with observations of candidate mappings. Observations are aggregated per
//! mapping and scored by frequency, weighted by whether the observation's
//! context matched the query's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::CircuitBreaker;
use crate::core::{Issue, IssueCode, ResolutionStatus};
use crate::errors::{EtlGraphError, Result};

const COMPONENT: &str = "confidence_resolver";

fn default_resolved_threshold() -> f64 {
    0.8
}

fn default_partial_threshold() -> f64 {
    0.5
}

fn default_ambiguity_margin() -> f64 {
    0.05
}

fn default_context_weight_match() -> f64 {
    1.0
}

fn default_context_weight_mismatch() -> f64 {
    0.7
}

fn default_max_suggestions() -> usize {
    5
}

/// Thresholds and weights used by the [`ConfidenceResolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Minimum score for `Resolved`.
    #[serde(default = "default_resolved_threshold")]
    pub resolved_threshold: f64,
    /// Minimum score for `Partial`.
    #[serde(default = "default_partial_threshold")]
    pub partial_threshold: f64,
    /// Top-two scores closer than this force `Partial`.
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    /// Weight applied when the observation context matched.
    #[serde(default = "default_context_weight_match")]
    pub context_weight_match: f64,
    /// Weight applied otherwise.
    #[serde(default = "default_context_weight_mismatch")]
    pub context_weight_mismatch: f64,
    /// Maximum number of ranked suggestions returned.
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            resolved_threshold: default_resolved_threshold(),
            partial_threshold: default_partial_threshold(),
            ambiguity_margin: default_ambiguity_margin(),
            context_weight_match: default_context_weight_match(),
            context_weight_mismatch: default_context_weight_mismatch(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

impl ConfidenceConfig {
    /// Sets both status thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, resolved: f64, partial: f64) -> Self {
        self.resolved_threshold = resolved;
        self.partial_threshold = partial;
        self
    }

    /// Sets the ambiguity margin.
    #[must_use]
    pub fn with_ambiguity_margin(mut self, margin: f64) -> Self {
        self.ambiguity_margin = margin;
        self
    }

    /// Sets the context weights.
    #[must_use]
    pub fn with_context_weights(mut self, matched: f64, mismatched: f64) -> Self {
        self.context_weight_match = matched;
        self.context_weight_mismatch = mismatched;
        self
    }

    /// Sets the suggestion limit.
    #[must_use]
    pub fn with_max_suggestions(mut self, max: usize) -> Self {
        self.max_suggestions = max;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("resolved_threshold", self.resolved_threshold),
            ("partial_threshold", self.partial_threshold),
            ("ambiguity_margin", self.ambiguity_margin),
            ("context_weight_match", self.context_weight_match),
            ("context_weight_mismatch", self.context_weight_mismatch),
        ] {
            if !unit.contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.partial_threshold > self.resolved_threshold {
            return Err("partial_threshold must not exceed resolved_threshold".to_string());
        }
        if self.max_suggestions < 1 {
            return Err("max_suggestions must be >= 1".to_string());
        }
        Ok(())
    }
}

/// One piece of evidence for a candidate mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Candidate mapping.
    pub mapping: String,
    /// How many times it was seen.
    pub occurrences: u64,
    /// Whether it was seen in a context matching the query.
    pub context_match: bool,
}

impl Observation {
    /// Creates an observation.
    #[must_use]
    pub fn new(mapping: impl Into<String>, occurrences: u64, context_match: bool) -> Self {
        Self {
            mapping: mapping.into(),
            occurrences,
            context_match,
        }
    }
}

/// A ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Candidate mapping.
    pub mapping: String,
    /// Weighted frequency score in `[0, 1]`.
    pub score: f64,
    /// Short summary of the evidence.
    pub evidence_summary: String,
}

/// Outcome of resolving one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResolution {
    /// The query key.
    pub query: String,
    /// Closed outcome.
    pub status: ResolutionStatus,
    /// Ranked suggestions, best first.
    pub suggestions: Vec<Suggestion>,
    /// The single issue recorded for this decision.
    pub issue: Issue,
}

impl ConfidenceResolution {
    /// The best suggestion.
    #[must_use]
    pub fn best(&self) -> Option<&Suggestion> {
        self.suggestions.first()
    }

    /// The resolved mapping, only when the status is `Resolved`.
    #[must_use]
    pub fn mapping(&self) -> Option<&str> {
        if self.status.is_resolved() {
            self.best().map(|s| s.mapping.as_str())
        } else {
            None
        }
    }

    /// Converts a non-resolved outcome into an error for callers that
    /// cannot proceed without a mapping.
    #[must_use]
    pub fn to_error(&self) -> Option<EtlGraphError> {
        if self.status.is_resolved() {
            return None;
        }
        Some(EtlGraphError::ConfidenceTooLow {
            query: self.query.clone(),
            score: self.best().map_or(0.0, |s| s.score),
        })
    }
}

/// An external provider of observations, such as a code corpus search.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Name of the source, used in operation keys.
    fn name(&self) -> &str;

    /// Gathers observations for a query.
    async fn gather(&self, query: &str) -> Result<Vec<Observation>>;
}

/// Scores candidate mappings for ambiguous queries.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceResolver {
    config: ConfidenceConfig,
}

impl ConfidenceResolver {
    /// Creates a resolver with the given configuration.
    #[must_use]
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Resolves a query from observations.
    #[must_use]
    pub fn resolve(&self, query: &str, observations: &[Observation]) -> ConfidenceResolution {
        let mut aggregated: BTreeMap<&str, (u64, bool)> = BTreeMap::new();
        for observation in observations {
            let entry = aggregated.entry(observation.mapping.as_str()).or_default();
            entry.0 += observation.occurrences;
            entry.1 |= observation.context_match;
        }
        let total: u64 = aggregated.values().map(|(count, _)| count).sum();

        if total == 0 {
            debug!(query, "No evidence for query");
            return ConfidenceResolution {
                query: query.to_string(),
                status: ResolutionStatus::Unresolvable,
                suggestions: Vec::new(),
                issue: Issue::reviewable(
                    IssueCode::ConfidenceTooLow,
                    query,
                    format!("No evidence found for '{query}'"),
                )
                .resolved_by(COMPONENT),
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let mut suggestions: Vec<Suggestion> = aggregated
            .into_iter()
            .filter(|(_, (count, _))| *count > 0)
            .map(|(mapping, (count, context_match))| {
                let weight = if context_match {
                    self.config.context_weight_match
                } else {
                    self.config.context_weight_mismatch
                };
                Suggestion {
                    mapping: mapping.to_string(),
                    score: count as f64 / total as f64 * weight,
                    evidence_summary: format!(
                        "{count} of {total} occurrences, context {}",
                        if context_match { "matched" } else { "not matched" }
                    ),
                }
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.mapping.cmp(&b.mapping))
        });
        suggestions.truncate(self.config.max_suggestions);

        let top = suggestions[0].score;
        let near_tie = suggestions
            .get(1)
            .is_some_and(|second| top - second.score < self.config.ambiguity_margin);

        // A near tie is never auto-resolved nor dropped, whatever the score.
        let status = if near_tie {
            ResolutionStatus::Partial
        } else if top >= self.config.resolved_threshold {
            ResolutionStatus::Resolved
        } else if top >= self.config.partial_threshold {
            ResolutionStatus::Partial
        } else {
            ResolutionStatus::Unresolvable
        };

        let issue = self.issue_for(query, status, &suggestions, near_tie);
        debug!(query, %status, top_score = top, candidates = suggestions.len(), "Resolved query");

        ConfidenceResolution {
            query: query.to_string(),
            status,
            suggestions,
            issue,
        }
    }

    /// Gathers evidence from `source` through the circuit breaker, then
    /// resolves.
    ///
    /// Each call dispatches at most once. Callers retry by calling again with
    /// the same breaker; once the source has failed `max_attempts` times with
    /// the same error the breaker refuses and the outcome is `Unresolvable`
    /// with a blocking `RETRY_LIMIT_EXCEEDED` issue.
    pub async fn resolve_with_source(
        &self,
        query: &str,
        source: &dyn EvidenceSource,
        breaker: &mut CircuitBreaker,
    ) -> ConfidenceResolution {
        let operation_key = format!("evidence:{}:{query}", source.name());

        match breaker
            .execute_async(&operation_key, || source.gather(query))
            .await
        {
            Ok(Ok(observations)) => self.resolve(query, &observations),
            Ok(Err(err)) => {
                warn!(query, source = source.name(), error = %err, "Evidence source failed");
                ConfidenceResolution {
                    query: query.to_string(),
                    status: ResolutionStatus::Unresolvable,
                    suggestions: Vec::new(),
                    issue: Issue::reviewable(
                        IssueCode::ConfidenceTooLow,
                        query,
                        format!("Evidence source '{}' failed: {err}", source.name()),
                    )
                    .resolved_by(COMPONENT),
                }
            }
            Err(refusal) => ConfidenceResolution {
                query: query.to_string(),
                status: ResolutionStatus::Unresolvable,
                suggestions: Vec::new(),
                issue: Issue::blocking(
                    IssueCode::RetryLimitExceeded,
                    operation_key.as_str(),
                    refusal.to_string(),
                )
                .resolved_by(COMPONENT),
            },
        }
    }

    fn issue_for(
        &self,
        query: &str,
        status: ResolutionStatus,
        suggestions: &[Suggestion],
        near_tie: bool,
    ) -> Issue {
        let best = &suggestions[0];
        match status {
            ResolutionStatus::Resolved => Issue::informational(
                IssueCode::MappingResolved,
                query,
                format!("'{query}' resolved to '{}' (score {:.3})", best.mapping, best.score),
            )
            .with_resolution(best.mapping.clone())
            .resolved_by(COMPONENT),
            ResolutionStatus::Partial => {
                let message = if near_tie {
                    format!(
                        "'{query}' is ambiguous between '{}' and '{}' (scores within {:.2})",
                        best.mapping, suggestions[1].mapping, self.config.ambiguity_margin
                    )
                } else {
                    format!(
                        "Best candidate for '{query}' is '{}' with score {:.3}, below {:.2}",
                        best.mapping, best.score, self.config.resolved_threshold
                    )
                };
                Issue::reviewable(IssueCode::ConfidenceTooLow, query, message)
                    .with_resolution(format!("suggested: {}", best.mapping))
                    .resolved_by(COMPONENT)
            }
            ResolutionStatus::Unresolvable => Issue::reviewable(
                IssueCode::ConfidenceTooLow,
                query,
                format!(
                    "No candidate for '{query}' reached {:.2}; best was '{}' with {:.3}",
                    self.config.partial_threshold, best.mapping, best.score
                ),
            )
            .resolved_by(COMPONENT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;
    use crate::resolution::CircuitBreakerConfig;
    use crate::testing::mocks::MockEvidenceSource;

    fn resolver() -> ConfidenceResolver {
        ConfidenceResolver::default()
    }

    #[test]
    fn test_dominant_mapping_resolves() {
        let resolution = resolver().resolve(
            "v_customer",
            &[Observation::new("X", 15, true), Observation::new("Y", 2, false)],
        );

        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(resolution.mapping(), Some("X"));
        assert!((resolution.suggestions[0].score - 15.0 / 17.0).abs() < 1e-9);
        assert_eq!(resolution.issue.code, IssueCode::MappingResolved);
        assert_eq!(resolution.issue.severity, Severity::Informational);
        assert!(resolution.to_error().is_none());
    }

    #[test]
    fn test_context_mismatch_lowers_score() {
        let resolution = resolver().resolve("q", &[Observation::new("X", 10, false)]);
        assert!((resolution.suggestions[0].score - 0.7).abs() < 1e-9);
        assert_eq!(resolution.status, ResolutionStatus::Partial);
        assert_eq!(resolution.issue.code, IssueCode::ConfidenceTooLow);
        assert_eq!(resolution.issue.severity, Severity::Reviewable);
    }

    #[test]
    fn test_observations_aggregate_by_mapping() {
        let resolution = resolver().resolve(
            "q",
            &[
                Observation::new("X", 3, false),
                Observation::new("X", 5, true),
                Observation::new("Y", 2, false),
            ],
        );
        assert_eq!(resolution.suggestions[0].mapping, "X");
        assert!((resolution.suggestions[0].score - 0.8).abs() < 1e-9);
        assert_eq!(resolution.status, ResolutionStatus::Resolved);
    }

    #[test]
    fn test_near_tie_forces_partial() {
        let config = ConfidenceConfig::default().with_thresholds(0.4, 0.3);
        let resolution = ConfidenceResolver::new(config).resolve(
            "q",
            &[Observation::new("B", 5, true), Observation::new("A", 5, true)],
        );

        assert_eq!(resolution.status, ResolutionStatus::Partial);
        assert_eq!(resolution.suggestions[0].mapping, "A");
        assert!(resolution.issue.message.contains("ambiguous"));
    }

    #[test]
    fn test_empty_evidence_is_unresolvable() {
        let resolution = resolver().resolve("q", &[]);
        assert_eq!(resolution.status, ResolutionStatus::Unresolvable);
        assert!(resolution.suggestions.is_empty());
        assert!(matches!(
            resolution.to_error(),
            Some(EtlGraphError::ConfidenceTooLow { .. })
        ));

        let zero = resolver().resolve("q", &[Observation::new("X", 0, true)]);
        assert_eq!(zero.status, ResolutionStatus::Unresolvable);
    }

    #[test]
    fn test_near_tie_below_partial_threshold_is_still_partial() {
        let observations: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|m| Observation::new(*m, 1, true))
            .collect();
        let resolution = resolver().resolve("q", &observations);

        assert!((resolution.suggestions[0].score - 0.25).abs() < 1e-9);
        assert_eq!(resolution.status, ResolutionStatus::Partial);
        assert!(resolution.issue.message.contains("ambiguous"));
        assert!(resolution.mapping().is_none());
    }

    #[test]
    fn test_low_score_unresolvable() {
        let observations = [
            Observation::new("a", 4, true),
            Observation::new("b", 3, true),
            Observation::new("c", 2, true),
            Observation::new("d", 1, true),
        ];
        let resolution = resolver().resolve("q", &observations);
        assert_eq!(resolution.status, ResolutionStatus::Unresolvable);
        assert_eq!(resolution.issue.severity, Severity::Reviewable);
    }

    #[test]
    fn test_suggestions_capped() {
        let observations: Vec<_> = (0..8)
            .map(|i| Observation::new(format!("m{i}"), 1, true))
            .collect();
        let resolution = resolver().resolve("q", &observations);
        assert_eq!(resolution.suggestions.len(), 5);
        assert_eq!(resolution.suggestions[0].mapping, "m0");
    }

    #[test]
    fn test_config_validation() {
        assert!(ConfidenceConfig::default().validate().is_ok());
        assert!(ConfidenceConfig::default()
            .with_thresholds(0.4, 0.6)
            .validate()
            .is_err());
        assert!(ConfidenceConfig::default()
            .with_context_weights(1.5, 0.7)
            .validate()
            .is_err());
        assert!(ConfidenceConfig::default()
            .with_max_suggestions(0)
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_resolve_with_source_success() {
        let source = MockEvidenceSource::new("corpus")
            .with_observations(vec![Observation::new("X", 9, true), Observation::new("Y", 1, true)]);
        let mut breaker = CircuitBreaker::default();

        let resolution = resolver()
            .resolve_with_source("v_region", &source, &mut breaker)
            .await;

        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_with_source_hits_retry_limit() {
        let source = MockEvidenceSource::new("corpus").failing("search backend timed out");
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let resolver = resolver();

        for _ in 0..2 {
            let attempt = resolver.resolve_with_source("v_region", &source, &mut breaker).await;
            assert_eq!(attempt.status, ResolutionStatus::Unresolvable);
            assert_eq!(attempt.issue.code, IssueCode::ConfidenceTooLow);
        }

        let refused = resolver.resolve_with_source("v_region", &source, &mut breaker).await;
        assert_eq!(refused.issue.code, IssueCode::RetryLimitExceeded);
        assert_eq!(refused.issue.severity, Severity::Blocking);
        assert_eq!(source.calls(), 2);
    }
}
