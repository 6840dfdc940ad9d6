//! State-machine knobs (the `[session]` config section)

use std::time::Duration;

use pacing::DelayRange;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cycles to complete in this run before the unit stops. 0 = unbounded.
    pub max_cycles: u64,
    /// Rounds of the entitlement pick loop.
    pub pick_count: u32,
    /// Options offered per pick round; the pick is drawn from `0..pick_options`.
    pub pick_options: u32,
    pub pick_delay_secs: DelayRange,
    pub matches_per_cycle: u32,
    pub match_timeout_secs: u64,
    pub match_poll_interval_secs: u64,
    /// Turns played before the match is ended.
    pub turns: u32,
    pub turn_poll_attempts: u32,
    /// Base pause between matches of a cycle, scaled by U(0.8, 1.2).
    pub match_delay_secs: f64,
    pub cycle_delay_secs: u64,
    pub rate_limit_cooldown_secs: u64,
    /// Re-login after this many completed cycles. 0 disables.
    pub relogin_every_cycles: u64,
    /// Re-login once the token is older than this. 0 disables.
    pub relogin_after_secs: u64,
    pub end_match_timeout_secs: u64,
    /// Fixed pause between phases of a cycle.
    pub step_delay_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cycles: 0,
            pick_count: 10,
            pick_options: 3,
            pick_delay_secs: DelayRange::new(Duration::from_secs(1), Duration::from_secs(3))
                .unwrap_or(DelayRange::ZERO),
            matches_per_cycle: 3,
            match_timeout_secs: 180,
            match_poll_interval_secs: 2,
            turns: 1,
            turn_poll_attempts: 20,
            match_delay_secs: 30.0,
            cycle_delay_secs: 30,
            rate_limit_cooldown_secs: 15,
            relogin_every_cycles: 20,
            relogin_after_secs: 1200,
            end_match_timeout_secs: 10,
            step_delay_secs: 2.0,
        }
    }
}

impl SessionConfig {
    /// Upper bound, in seconds, for every delay and timeout knob.
    pub const MAX_DELAY_SECS: u64 = 86_400;

    /// Check invariants the state machine relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.matches_per_cycle == 0 {
            return Err("session.matches_per_cycle must be at least 1".into());
        }
        if self.pick_options == 0 {
            return Err("session.pick_options must be at least 1".into());
        }
        if self.match_poll_interval_secs == 0 {
            return Err("session.match_poll_interval_secs must be at least 1".into());
        }
        if self.match_timeout_secs == 0 {
            return Err("session.match_timeout_secs must be at least 1".into());
        }
        if self.end_match_timeout_secs == 0 {
            return Err("session.end_match_timeout_secs must be at least 1".into());
        }
        let max = Self::MAX_DELAY_SECS;
        for (name, value) in [
            ("match_timeout_secs", self.match_timeout_secs),
            ("match_poll_interval_secs", self.match_poll_interval_secs),
            ("cycle_delay_secs", self.cycle_delay_secs),
            ("rate_limit_cooldown_secs", self.rate_limit_cooldown_secs),
            ("relogin_after_secs", self.relogin_after_secs),
            ("end_match_timeout_secs", self.end_match_timeout_secs),
        ] {
            if value > max {
                return Err(format!("session.{name} must be at most {max}, got {value}"));
            }
        }
        for (name, value) in [
            ("match_delay_secs", self.match_delay_secs),
            ("step_delay_secs", self.step_delay_secs),
        ] {
            if !value.is_finite() || value < 0.0 || value > max as f64 {
                return Err(format!("session.{name} must be between 0 and {max}, got {value}"));
            }
        }
        if self.pick_delay_secs.max() > Duration::from_secs(max) {
            return Err(format!("session.pick_delay_secs must be at most {max}"));
        }
        Ok(())
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_secs(self.match_timeout_secs)
    }

    pub fn match_poll_interval(&self) -> Duration {
        Duration::from_secs(self.match_poll_interval_secs)
    }

    pub fn match_delay(&self) -> DelayRange {
        DelayRange::scaled(secs_f64(self.match_delay_secs), 0.8, 1.2)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn relogin_after(&self) -> Option<Duration> {
        (self.relogin_after_secs > 0).then(|| Duration::from_secs(self.relogin_after_secs))
    }

    pub fn end_match_timeout(&self) -> Duration {
        Duration::from_secs(self.end_match_timeout_secs)
    }

    pub fn step_delay(&self) -> Duration {
        secs_f64(self.step_delay_secs)
    }
}

fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}
