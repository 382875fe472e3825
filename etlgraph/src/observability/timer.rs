//! Phase timing.

use std::time::Instant;

/// Measures how long a pipeline phase took.
#[derive(Debug)]
pub struct PhaseTimer {
    start: Instant,
    phase: &'static str,
}

impl PhaseTimer {
    /// Starts timing `phase`.
    #[must_use]
    pub fn start(phase: &'static str) -> Self {
        Self {
            start: Instant::now(),
            phase,
        }
    }

    /// Elapsed milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The phase name.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        self.phase
    }

    /// Logs the duration at debug level and returns it.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.elapsed_ms();
        tracing::debug!(phase = self.phase, elapsed_ms, "Phase finished");
        elapsed_ms
    }
}
