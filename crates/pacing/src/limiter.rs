//! Process-wide outbound request pacing
//!
//! One `RateLimiter` is shared (via `Arc`) by every session unit. Before each
//! request attempt a unit calls `throttle(Some(account_id))`, which waits until:
//!
//! 1. the account's own cadence allows another request (per-account spacing),
//! 2. every 50th request of that account has taken an extra cooldown,
//! 3. the global spacing since the last request of *any* account has elapsed.
//!
//! Lock layout: each account has its own slot mutex, held while that account
//! waits on its own cadence, so one account's spacing never blocks another.
//! The global timestamp sits behind a single mutex held for the whole
//! check-sleep-record sequence, which serializes the global spacing across all
//! callers. Both timestamps are recorded at the same instant, under their
//! locks, immediately before `throttle` returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::delay::DelayRange;

/// Pacing configuration (the `[pacing]` config section).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingPolicy {
    /// Minimum spacing between any two requests, drawn per call.
    #[serde(rename = "global_spacing_secs")]
    pub global_spacing: DelayRange,
    /// Minimum spacing between two requests of the same account.
    #[serde(rename = "account_spacing_secs")]
    pub account_spacing: DelayRange,
    /// Added on top of any spacing wait so callers never wake in lockstep.
    #[serde(rename = "jitter_secs")]
    pub jitter: DelayRange,
    /// Every Nth request of an account takes an extra cooldown. 0 disables.
    pub cooldown_every: u64,
    #[serde(rename = "cooldown_secs")]
    pub cooldown: DelayRange,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            global_spacing: DelayRange::new(Duration::from_millis(500), Duration::from_secs(2))
                .unwrap_or(DelayRange::ZERO),
            account_spacing: DelayRange::fixed(Duration::from_secs(1)),
            jitter: DelayRange::new(Duration::from_millis(100), Duration::from_millis(300))
                .unwrap_or(DelayRange::ZERO),
            cooldown_every: 50,
            cooldown: DelayRange::new(Duration::from_secs(2), Duration::from_secs(5))
                .unwrap_or(DelayRange::ZERO),
        }
    }
}

impl PacingPolicy {
    /// No spacing, jitter or cooldown. Useful for tests and local replay.
    pub fn unpaced() -> Self {
        Self {
            global_spacing: DelayRange::ZERO,
            account_spacing: DelayRange::ZERO,
            jitter: DelayRange::ZERO,
            cooldown_every: 0,
            cooldown: DelayRange::ZERO,
        }
    }
}

/// Per-account pacing record.
#[derive(Debug, Default)]
struct AccountPace {
    last_request: Option<Instant>,
    request_count: u64,
}

/// Shared limiter. Cheap to clone behind an `Arc`; never returns an error.
#[derive(Debug)]
pub struct RateLimiter {
    policy: PacingPolicy,
    last_global: Mutex<Option<Instant>>,
    accounts: StdMutex<HashMap<String, Arc<Mutex<AccountPace>>>>,
}

impl RateLimiter {
    pub fn new(policy: PacingPolicy) -> Self {
        Self {
            policy,
            last_global: Mutex::new(None),
            accounts: StdMutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    /// Block until it is safe to issue the next request, then return the
    /// instant the request slot was granted.
    ///
    /// `account_id = None` applies global spacing only.
    pub async fn throttle(&self, account_id: Option<&str>) -> Instant {
        let slot = account_id.map(|id| (id, self.slot(id)));

        let mut pace = match &slot {
            Some((_, slot)) => Some(slot.lock().await),
            None => None,
        };

        if let (Some((id, _)), Some(pace)) = (&slot, pace.as_mut()) {
            if let Some(last) = pace.last_request {
                let spacing = self.policy.account_spacing.sample();
                let elapsed = last.elapsed();
                if elapsed < spacing {
                    let wait = spacing - elapsed + self.policy.jitter.sample();
                    trace!(account_id = id, wait_ms = wait.as_millis() as u64, "account spacing");
                    sleep(wait).await;
                }
            }

            pace.request_count += 1;
            let every = self.policy.cooldown_every;
            if every > 0 && pace.request_count % every == 0 {
                let cooldown = self.policy.cooldown.sample();
                debug!(
                    account_id = id,
                    requests = pace.request_count,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "periodic account cooldown"
                );
                metrics::counter!("arena_pacing_cooldowns_total").increment(1);
                sleep(cooldown).await;
            }
        }

        let granted = {
            let mut last_global = self.last_global.lock().await;
            if let Some(last) = *last_global {
                let spacing = self.policy.global_spacing.sample();
                let elapsed = last.elapsed();
                if elapsed < spacing {
                    let wait = spacing - elapsed + self.policy.jitter.sample();
                    trace!(wait_ms = wait.as_millis() as u64, "global spacing");
                    sleep(wait).await;
                }
            }
            let now = Instant::now();
            *last_global = Some(now);
            now
        };

        if let Some(pace) = pace.as_mut() {
            pace.last_request = Some(granted);
        }
        granted
    }

    /// Requests granted so far for an account.
    pub async fn request_count(&self, account_id: &str) -> u64 {
        let slot = self.slot(account_id);
        let pace = slot.lock().await;
        pace.request_count
    }

    fn slot(&self, account_id: &str) -> Arc<Mutex<AccountPace>> {
        let mut accounts = self
            .accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        accounts
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PacingPolicy::default())
    }
}
