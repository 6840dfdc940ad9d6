//! Session states, per-unit runtime bookkeeping and the recovery policy
//!
//! `plan_recovery` is the pure half of the outer loop: given how a login or
//! cycle ended and the unit's runtime state, it decides what happens next.
//! The async driver in `machine.rs` only executes the plan.

use std::time::Duration;

use pacing::DelayRange;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::Error;

/// Where a session unit currently is in its lifecycle.
///
/// ```text
/// LoggedOut -> LoggingIn -> Idle -> [AcquiringEntitlement -> Picking]
///   -> MatchRequested -> WaitingForMatch -> InMatch -> EndingMatch
///   -> (next match | ClaimingReward) -> Idle
/// ```
///
/// `Quarantined` is absorbing and reachable from any authenticated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    Idle,
    AcquiringEntitlement,
    Picking,
    MatchRequested,
    WaitingForMatch,
    InMatch,
    EndingMatch,
    ClaimingReward,
    Quarantined,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::LoggedOut => "logged_out",
            SessionState::LoggingIn => "logging_in",
            SessionState::Idle => "idle",
            SessionState::AcquiringEntitlement => "acquiring_entitlement",
            SessionState::Picking => "picking",
            SessionState::MatchRequested => "match_requested",
            SessionState::WaitingForMatch => "waiting_for_match",
            SessionState::InMatch => "in_match",
            SessionState::EndingMatch => "ending_match",
            SessionState::ClaimingReward => "claiming_reward",
            SessionState::Quarantined => "quarantined",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Quarantined
    }
}

/// Per-unit mutable state. Never shared between units.
#[derive(Debug, Clone, Default)]
pub struct WorkerRuntimeState {
    /// Failed cycles (or logins) in a row. Reset by a completed cycle.
    pub consecutive_failures: u32,
    /// Cycles completed during this run.
    pub cycles_completed: u64,
    pub last_login: Option<Instant>,
    /// Successful logins during this run.
    pub login_count: u64,
    /// Cycles completed since the last login.
    pub cycles_since_login: u64,
    /// Set by escalation; the next iteration logs in again.
    pub force_relogin: bool,
    pub banned: bool,
    pub ban_reason: Option<String>,
}

impl WorkerRuntimeState {
    pub fn record_login(&mut self, now: Instant) {
        self.last_login = Some(now);
        self.login_count += 1;
        self.cycles_since_login = 0;
        self.force_relogin = false;
    }

    pub fn record_cycle(&mut self) {
        self.consecutive_failures = 0;
        self.cycles_completed += 1;
        self.cycles_since_login += 1;
    }

    pub fn record_ban(&mut self, reason: &str) {
        if !self.banned {
            self.banned = true;
            self.ban_reason = Some(reason.to_string());
        }
    }

    /// Whether a (re-)login is due before the next cycle.
    pub fn needs_login(&self, now: Instant, config: &SessionConfig) -> bool {
        let Some(last) = self.last_login else {
            return true;
        };
        if self.force_relogin {
            return true;
        }
        if config.relogin_every_cycles > 0 && self.cycles_since_login >= config.relogin_every_cycles {
            return true;
        }
        match config.relogin_after() {
            Some(max_age) => now.duration_since(last) >= max_age,
            None => false,
        }
    }
}

/// Ephemeral state of one located match. Never persisted.
#[derive(Debug, Clone)]
pub struct MatchContext {
    pub match_id: String,
    pub side: String,
    /// Next action id to submit; starts at 1 and only increases.
    pub next_action_id: u64,
    pub started_at: Instant,
}

impl MatchContext {
    pub fn new(match_id: impl Into<String>, side: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            side: side.into(),
            next_action_id: 1,
            started_at: Instant::now(),
        }
    }

    /// Take the next action id.
    pub fn advance(&mut self) -> u64 {
        let id = self.next_action_id;
        self.next_action_id += 1;
        id
    }
}

/// Backoff tier for `n` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub delay: DelayRange,
    pub force_relogin: bool,
}

pub fn escalation(consecutive_failures: u32) -> Escalation {
    let (min, max, force_relogin) = match consecutive_failures {
        0..=2 => (10, 20, false),
        3..=5 => (20, 40, false),
        _ => (40, 60, true),
    };
    Escalation {
        delay: DelayRange::new(Duration::from_secs(min), Duration::from_secs(max))
            .unwrap_or(DelayRange::ZERO),
        force_relogin,
    }
}

/// What the outer loop does after a login or cycle attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Carry on to the next iteration after `delay`.
    Continue { delay: DelayRange },
    /// Cool down after a 429; the failure counter is untouched.
    CoolDown { delay: Duration },
    /// Failure escalation: counter already incremented by the caller.
    Backoff { delay: DelayRange, force_relogin: bool },
    /// Ban signal: quarantine and stop.
    Quarantine { reason: String },
    /// Cancellation observed: stop.
    Stop,
}

/// Decide the follow-up for an attempt result.
///
/// `consecutive_failures` is the count *after* the attempt was recorded.
pub fn plan_recovery(
    result: &Result<(), Error>,
    consecutive_failures: u32,
    config: &SessionConfig,
) -> Recovery {
    match result {
        Ok(()) => Recovery::Continue {
            delay: DelayRange::fixed(config.cycle_delay()),
        },
        Err(Error::Banned(reason)) => Recovery::Quarantine {
            reason: reason.clone(),
        },
        Err(Error::RateLimited(_)) => Recovery::CoolDown {
            delay: config.rate_limit_cooldown(),
        },
        Err(Error::Soft(_)) => {
            let tier = escalation(consecutive_failures);
            Recovery::Backoff {
                delay: tier.delay,
                force_relogin: tier.force_relogin,
            }
        }
        Err(Error::Cancelled) => Recovery::Stop,
    }
}
