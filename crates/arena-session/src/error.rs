//! Step failures of the session state machine
//!
//! Every protocol step returns `Result<T>`. The variant decides what the
//! outer loop does next, so the mapping from response to variant is the whole
//! failure policy.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// 403 or an error-bearing login body. Terminal for the account.
    #[error("banned: {0}")]
    Banned(String),

    /// 429. Cool down, then retry the step on the next outer iteration.
    #[error("rate limited during {0}")]
    RateLimited(&'static str),

    /// Malformed response, unexpected status, exhausted retries, timeout.
    /// Counts toward failure escalation.
    #[error("{0}")]
    Soft(String),

    /// The unit's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// Result alias for session steps.
pub type Result<T> = std::result::Result<T, Error>;
