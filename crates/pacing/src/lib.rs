//! Request pacing for concurrent session units
//!
//! Provides the process-wide `RateLimiter` every outbound call goes through,
//! the `DelayRange` type used for all randomized waits, and `sleep_or_cancel`,
//! the single suspension primitive that lets a unit observe cancellation while
//! it waits.
//!
//! All timing uses `tokio::time`, so tests drive the limiter with tokio's
//! paused clock instead of real sleeps.

pub mod delay;
pub mod limiter;

pub use delay::{DelayRange, sleep_or_cancel};
pub use limiter::{PacingPolicy, RateLimiter};
