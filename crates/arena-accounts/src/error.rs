//! Error types for account store operations

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account file parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid account file: {0}")]
    Invalid(String),
}

/// Result alias for account store operations.
pub type Result<T> = std::result::Result<T, Error>;
