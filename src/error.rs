// Error kinds shared across the matchmaking and session layers.
//
// Errors cross component boundaries as values, never as panics. Retries
// happen only at the immediate boundary that owns them (reservation write,
// rating persistence, sandbox submit behind the breaker).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or unsupported client input. Returned to the submitter only.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A player failed pre-flight checks (existing reservation, active bot,
    /// invalid id). The pairing pass aborts the pair without side effects.
    #[error("preflight conflict: {0}")]
    PreflightConflict(String),

    /// Coordination store or document store is unreachable or returned a
    /// protocol-level failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Sandbox submit/poll failure, including breaker-open short circuits.
    #[error("sandbox error: {0}")]
    SandboxError(String),

    /// The complexity verifier returned garbage or was unreachable. The
    /// session treats this as fail-open; the error itself is never a PASS.
    #[error("complexity verification error: {0}")]
    ComplexityError(String),

    /// Another worker won the race (lock not acquired, re-check failed).
    /// Handled silently by the loser.
    #[error("concurrency loss")]
    ConcurrencyLoss,

    /// Produced only by the session disposal safety net when it finds a
    /// still-ongoing blob with no live owner.
    #[error("match abandoned")]
    AbandonedMatch,
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::StoreUnavailable(e.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::StoreUnavailable(format!("serialization: {e}"))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::SandboxError(e.to_string())
    }
}
