//! Accounts and their durable progress
//!
//! `Account` is the record a session unit drives; `AccountStore` is the JSON
//! file backing it. Session units never touch the store directly: they hand
//! the mutated record to a `Checkpoint` at cycle boundaries, on quarantine and
//! on exit.

pub mod account;
pub mod error;
pub mod store;

pub use account::{Account, AccountStatus, Progress};
pub use error::{Error, Result};
pub use store::AccountStore;

use std::future::Future;
use std::pin::Pin;

/// Persistence hook called by a session unit with its current account record.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Checkpoint>`).
pub trait Checkpoint: Send + Sync {
    fn save<'a>(&'a self, account: &'a Account) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
