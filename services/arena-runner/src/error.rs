//! Service-specific error types

use thiserror::Error;

/// Runner errors. Per-unit failures never surface here: they end the unit
/// and are reported through its `UnitReport`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("orchestrator already running {0} units")]
    AlreadyRunning(usize),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
