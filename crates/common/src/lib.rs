//! Common types shared by the arena runner crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
