//! Error taxonomy for pipeline stage outcomes. Stage functions return
//! `anyhow::Result<T>` with `.context(...)` threaded throughout; `FailureKind` is
//! carried alongside the outcome to drive retry policy and per-stage metrics
//! without folding the taxonomy into the error type itself.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Substrate/store/LLM/embedding/notification timeout or connection error.
    Transient,
    /// LLM JSON parse failure or schema mismatch.
    MalformedLlmOutput,
    /// A risk event links to a supplier name that does not exist.
    MissingReference,
    /// Fingerprint or risk-event already seen; never double-emit.
    Duplicate,
    /// Negative weights, empty materials, or another broken invariant.
    InvariantViolation,
    /// Caller deadline/cancellation.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::MalformedLlmOutput => "malformed_llm_output",
            FailureKind::MissingReference => "missing_reference",
            FailureKind::Duplicate => "duplicate",
            FailureKind::InvariantViolation => "invariant_violation",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a worker should do with a message after a stage function returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Ack: processing is complete (success, duplicate, or a handled permanent failure).
    Ack,
    /// Leave unacked: transient failure or cancellation, eligible for Claim later.
    Retry,
}

impl FailureKind {
    pub fn disposition(&self) -> Disposition {
        match self {
            FailureKind::Transient | FailureKind::Cancelled => Disposition::Retry,
            FailureKind::MalformedLlmOutput
            | FailureKind::MissingReference
            | FailureKind::Duplicate
            | FailureKind::InvariantViolation => Disposition::Ack,
        }
    }
}

/// A stage failure classified well enough for the consumer loop to decide,
/// via [`FailureKind::disposition`], whether to ack the message or leave it
/// unacked for a later Claim.
#[derive(Debug)]
pub struct StageError {
    pub kind: FailureKind,
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(kind: FailureKind, source: anyhow::Error) -> Self {
        Self { kind, source }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source, self.kind)
    }
}

impl std::error::Error for StageError {}

/// Anything bubbling up via `?` without explicit classification is treated as
/// transient: left unacked, eligible for Claim once the underlying call
/// (store, substrate, LLM, embedding) recovers.
impl From<anyhow::Error> for StageError {
    fn from(source: anyhow::Error) -> Self {
        StageError::new(FailureKind::Transient, source)
    }
}
