//! The engine's error taxonomy.
//!
//! Every fallible engine operation returns [`EngineError`] so callers (the
//! scheduler, the control-plane adapter, tests) can match on *kind* rather
//! than parse a message. See spec §7 for the policy each variant implies.

use thiserror::Error;

/// The closed set of failure kinds the engine can produce.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller-supplied data failed a domain invariant (e.g. priority out of
    /// range, duplicate username). Surfaced to the caller, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would violate a uniqueness invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Navigation timed out, or the remote returned a non-2xx response.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A required selector was missing from the document.
    #[error("parse error: {0}")]
    Parse(String),

    /// A proxy or network-level failure. Attributed to the proxy that was
    /// in use (see `proxy_pool::classify`).
    #[error("transport error: {0}")]
    Transport(String),

    /// No proxy satisfied `healthy ∧ ¬cooling`, even after an emergency
    /// health check.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// The operation observed cancellation at a suspension point. Never
    /// logged as an error (§7).
    #[error("operation cancelled")]
    Cancelled,

    /// Anything else: a bug, an unexpected panic boundary, a persistence
    /// failure. Logged at error level; never crashes the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the scheduler should reschedule normally after this failure.
    ///
    /// `Validation`/`NotFound`/`Conflict` are caller mistakes, not transient
    /// scrape failures, so they are not retryable in the scheduling sense
    /// even though the account itself still gets rescheduled on its normal
    /// cadence (a failed fetch is always rescheduled per §4.5 — this flag
    /// instead governs whether the *error itself* should be treated as
    /// informative-but-expected vs. a real fault worth surfacing loudly).
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::Validation(_) | EngineError::NotFound(_) | EngineError::Conflict(_)
        )
    }

    /// Whether this error should ever be logged at `error` level.
    pub fn should_log_as_error(&self) -> bool {
        matches!(self, EngineError::Internal(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
