//! Cycle resolution, confidence scoring and retry control.

mod circuit_breaker;
mod confidence;
mod engine;

pub use circuit_breaker::{error_signature, AttemptRecord, CircuitBreaker, CircuitBreakerConfig};
pub use confidence::{
    ConfidenceConfig, ConfidenceResolution, ConfidenceResolver, EvidenceSource, Observation,
    Suggestion,
};
pub use engine::{
    BreakDecision, BreakPoint, ResolutionEngine, ResolutionOutcome, REASON_ALL_DATA,
    REASON_TOO_COMPLEX,
};
