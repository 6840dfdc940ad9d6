//! Per-account session state machine
//!
//! A `SessionUnit` drives one account through login, entitlement cycles,
//! scripted matches and reward claims against the remote game protocol.
//! Remote calls go through `GameApi`, which maps responses onto the step
//! failure taxonomy in `error`; the outer loop's recovery policy lives in
//! `state` as a pure function.

pub mod api;
pub mod config;
pub mod error;
pub mod machine;
pub mod reporter;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{ActionKind, GameApi, LocatedMatch, LoginGrant};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use machine::{ExitReason, SessionUnit, UnitReport};
pub use reporter::Reporter;
pub use state::{MatchContext, Recovery, SessionState, WorkerRuntimeState, plan_recovery};
