//! Caller-enforced circuit breaker for repeated failures.
//!
//! The breaker never retries on its own. Callers consult [`CircuitBreaker::check`]
//! before each attempt and report the outcome back.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::errors::RetryLimitExceededError;

static DIGITS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

fn default_max_attempts() -> usize {
    2
}

fn default_max_total_attempts() -> usize {
    5
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Attempts allowed with the same failure signature (default: 2).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Failed attempts allowed in total, whatever the signatures (default: 5).
    #[serde(default = "default_max_total_attempts")]
    pub max_total_attempts: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_total_attempts: default_max_total_attempts(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the ceiling on failed attempts across signatures.
    #[must_use]
    pub fn with_max_total_attempts(mut self, max_total_attempts: usize) -> Self {
        self.max_total_attempts = max_total_attempts;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if self.max_total_attempts < self.max_attempts {
            return Err("max_total_attempts must be >= max_attempts".to_string());
        }
        Ok(())
    }
}

/// Failure history of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Operation key, e.g. `fix:missing-source:ekip`.
    pub operation_key: String,
    /// Consecutive failed attempts with `last_error_signature`.
    pub attempts: usize,
    /// Failed attempts since the last success, any signature.
    #[serde(default)]
    pub total_attempts: usize,
    /// Signature of the most recent failure.
    pub last_error_signature: String,
}

/// Tracks failed attempts per operation and refuses repeats of the same failure.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    records: BTreeMap<String, AttemptRecord>,
}

impl CircuitBreaker {
    /// Creates a breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
        }
    }

    /// The attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.config.max_attempts
    }

    /// The ceiling on failed attempts across signatures.
    #[must_use]
    pub fn max_total_attempts(&self) -> usize {
        self.config.max_total_attempts
    }

    /// Refuses when the operation already failed `max_attempts` times with
    /// `signature`, or `max_total_attempts` times with any signature.
    pub fn check(&self, operation_key: &str, signature: &str) -> Result<(), RetryLimitExceededError> {
        match self.records.get(operation_key) {
            Some(record)
                if record.total_attempts >= self.config.max_total_attempts
                    || (record.attempts >= self.config.max_attempts
                        && record.last_error_signature == signature) =>
            {
                Err(self.refusal(record))
            }
            _ => Ok(()),
        }
    }

    /// Returns true if the next attempt of the operation would be refused.
    #[must_use]
    pub fn is_open(&self, operation_key: &str) -> bool {
        self.records.get(operation_key).is_some_and(|record| self.exhausted(record))
    }

    /// Records a failed attempt and returns the updated record.
    ///
    /// A failure with a new signature restarts the count.
    pub fn record_failure(&mut self, operation_key: &str, signature: &str) -> &AttemptRecord {
        let record = self
            .records
            .entry(operation_key.to_string())
            .or_insert_with(|| AttemptRecord {
                operation_key: operation_key.to_string(),
                attempts: 0,
                total_attempts: 0,
                last_error_signature: signature.to_string(),
            });

        record.total_attempts += 1;
        if record.last_error_signature == signature {
            record.attempts += 1;
        } else {
            record.attempts = 1;
            record.last_error_signature = signature.to_string();
        }

        debug!(
            operation = operation_key,
            attempts = record.attempts,
            total_attempts = record.total_attempts,
            "Recorded failed attempt"
        );
        record
    }

    /// Discards the record of an operation that succeeded.
    pub fn record_success(&mut self, operation_key: &str) {
        self.records.remove(operation_key);
    }

    /// Failed attempts recorded for an operation.
    #[must_use]
    pub fn attempts(&self, operation_key: &str) -> usize {
        self.records.get(operation_key).map_or(0, |r| r.attempts)
    }

    /// The record for an operation, if it has failed.
    #[must_use]
    pub fn record(&self, operation_key: &str) -> Option<&AttemptRecord> {
        self.records.get(operation_key)
    }

    /// All open records, sorted by key.
    pub fn records(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.records.values()
    }

    /// Discards every record. Called when the owning run ends.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Runs `operation` unless the breaker is open for `operation_key`.
    ///
    /// The outer `Err` is a refusal; the inner result is the operation's own.
    pub fn execute<T, E, F>(
        &mut self,
        operation_key: &str,
        operation: F,
    ) -> Result<Result<T, E>, RetryLimitExceededError>
    where
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        self.guard(operation_key)?;
        let result = operation();
        self.observe(operation_key, &result);
        Ok(result)
    }

    /// Async variant of [`CircuitBreaker::execute`].
    pub async fn execute_async<T, E, F, Fut>(
        &mut self,
        operation_key: &str,
        operation: F,
    ) -> Result<Result<T, E>, RetryLimitExceededError>
    where
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard(operation_key)?;
        let result = operation().await;
        self.observe(operation_key, &result);
        Ok(result)
    }

    fn guard(&self, operation_key: &str) -> Result<(), RetryLimitExceededError> {
        match self.records.get(operation_key) {
            Some(record) if self.exhausted(record) => {
                let refusal = self.refusal(record);
                warn!(
                    operation = operation_key,
                    attempts = record.attempts,
                    "Circuit breaker refused operation"
                );
                Err(refusal)
            }
            _ => Ok(()),
        }
    }

    fn observe<T, E: Display>(&mut self, operation_key: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_success(operation_key),
            Err(err) => {
                let signature = error_signature(&err.to_string());
                self.record_failure(operation_key, &signature);
            }
        }
    }

    fn exhausted(&self, record: &AttemptRecord) -> bool {
        record.attempts >= self.config.max_attempts
            || record.total_attempts >= self.config.max_total_attempts
    }

    fn refusal(&self, record: &AttemptRecord) -> RetryLimitExceededError {
        RetryLimitExceededError {
            operation_key: record.operation_key.clone(),
            attempts: record.total_attempts,
            error_signature: record.last_error_signature.clone(),
        }
    }
}

/// Stable signature of an error message.
///
/// Case, whitespace runs and digit runs are normalized before hashing so
/// messages differing only in counters or timestamps compare equal.
#[must_use]
pub fn error_signature(message: &str) -> String {
    let mut normalized = message.trim().to_lowercase();
    if let Some(digits) = DIGITS.as_ref() {
        normalized = digits.replace_all(&normalized, "#").into_owned();
    }
    if let Some(whitespace) = WHITESPACE.as_ref() {
        normalized = whitespace.replace_all(&normalized, " ").into_owned();
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
