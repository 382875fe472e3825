//! Mock tasks and evidence sources for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{Issue, IssueCode, Node};
use crate::errors::{EtlGraphError, Result};
use crate::execution::UnitTask;
use crate::resolution::{EvidenceSource, Observation};

/// A task that records which units started and how many ran at once.
#[derive(Debug, Default)]
pub struct RecordingTask {
    delay: Option<Duration>,
    blocking_for: BTreeSet<String>,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingTask {
    /// Creates a task that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `ms` milliseconds in every run.
    #[must_use]
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    /// Reports a blocking issue when running `node_id`.
    #[must_use]
    pub fn with_blocking_issue_for(mut self, node_id: impl Into<String>) -> Self {
        self.blocking_for.insert(node_id.into());
        self
    }

    /// Unit ids in the order they started.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// Highest number of concurrently running units seen.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitTask for RecordingTask {
    async fn run(&self, node: &Node) -> Result<Vec<Issue>> {
        self.started.lock().push(node.id.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.blocking_for.contains(&node.id) {
            return Ok(vec![Issue::blocking(
                IssueCode::ValidationFailure,
                node.id.as_str(),
                "row count check failed",
            )]);
        }
        Ok(Vec::new())
    }
}

/// A task that always fails for the given units and succeeds for the rest.
#[derive(Debug)]
pub struct FailingTask {
    failing: BTreeSet<String>,
    message: String,
    vary_message: bool,
    calls: Mutex<BTreeMap<String, usize>>,
}

impl FailingTask {
    /// Creates a task failing `ids` with `message`.
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>, message: impl Into<String>) -> Self {
        Self {
            failing: ids.into_iter().map(Into::into).collect(),
            message: message.into(),
            vary_message: false,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Appends a different letter-only token to the message on every call,
    /// like a session id, so consecutive failures never share a signature.
    #[must_use]
    pub fn with_changing_message(mut self) -> Self {
        self.vary_message = true;
        self
    }

    /// How many times `node_id` was run.
    #[must_use]
    pub fn calls(&self, node_id: &str) -> usize {
        self.calls.lock().get(node_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UnitTask for FailingTask {
    async fn run(&self, node: &Node) -> Result<Vec<Issue>> {
        let call = {
            let mut calls = self.calls.lock();
            let entry = calls.entry(node.id.clone()).or_default();
            *entry += 1;
            *entry
        };
        if self.failing.contains(&node.id) {
            let message = if self.vary_message {
                format!("{} session {}", self.message, letter_token(call))
            } else {
                self.message.clone()
            };
            return Err(EtlGraphError::Task(message));
        }
        Ok(Vec::new())
    }
}

fn letter_token(mut n: usize) -> String {
    let mut token = String::new();
    loop {
        let letter = b'a' + u8::try_from(n % 26).unwrap_or(0);
        token.insert(0, char::from(letter));
        n /= 26;
        if n == 0 {
            return token;
        }
    }
}

/// An evidence source returning fixed observations, or failing.
#[derive(Debug)]
pub struct MockEvidenceSource {
    name: String,
    observations: Vec<Observation>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockEvidenceSource {
    /// Creates a source with no observations.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            observations: Vec::new(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the observations returned by every gather.
    #[must_use]
    pub fn with_observations(mut self, observations: Vec<Observation>) -> Self {
        self.observations = observations;
        self
    }

    /// Makes every gather fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Number of gathers.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceSource for MockEvidenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn gather(&self, _query: &str) -> Result<Vec<Observation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(EtlGraphError::Task(message.clone())),
            None => Ok(self.observations.clone()),
        }
    }
}
