//! Resilient request execution
//!
//! `Executor::execute` performs one logical call: throttle, send, and on a
//! retryable fault back off exponentially and try again. HTTP statuses are
//! never retried here; every response, whatever its code, is handed back to
//! the caller. Jitter is left to the rate limiter, so the backoff itself is
//! pure `base * multiplier^n`.
//!
//! A certificate fault is repeated once on the transport's unverified path
//! (degraded trust) before it counts as a failed attempt. The repeat waits
//! for the rate limiter like any other send.

use crate::{Attempt, Fault, FaultKind, Reply, Request, Transport};
use pacing::{RateLimiter, sleep_or_cancel};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Retry policy for transient network faults (the `[retry]` config section).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2.0,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `n`th failed attempt (0-based).
    pub fn backoff(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.base_delay_secs * self.multiplier.powi(exponent);
        if secs.is_finite() && secs > 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Terminal result of one logical call.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A response arrived (any status code).
    Response(Reply),
    /// Every attempt hit a retryable fault.
    Exhausted { fault: Fault, attempts: u32 },
    /// A non-retryable fault; no further attempts were made.
    Fatal(Fault),
    /// The unit's cancellation token fired before the call completed.
    Cancelled,
}

impl Outcome {
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Outcome::Response(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn into_reply(self) -> Option<Reply> {
        match self {
            Outcome::Response(reply) => Some(reply),
            _ => None,
        }
    }

    /// Short human-readable description for status lines.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Response(reply) => format!("HTTP {}", reply.status),
            Outcome::Exhausted { fault, attempts } => {
                format!("{} after {attempts} attempts", fault.kind)
            }
            Outcome::Fatal(fault) => format!("{} error", fault.kind),
            Outcome::Cancelled => "cancelled".to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Response(_) => "response",
            Outcome::Exhausted { .. } => "exhausted",
            Outcome::Fatal(_) => "fatal",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Per-unit request executor. Each session unit owns one; the transport and
/// limiter behind it are shared.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    account_id: Option<String>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
            account_id: None,
            cancel,
        }
    }

    /// Pace every attempt under this account's cadence as well as the global one.
    pub fn for_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(&self, request: &Request) -> Outcome {
        let outcome = self.run(request).await;
        metrics::counter!("arena_requests_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn run(&self, request: &Request) -> Outcome {
        let account = self.account_id.as_deref().unwrap_or("-");
        let mut failed = 0u32;

        loop {
            let attempt = match self.paced_send(request, false).await {
                Some(Attempt::Fault(fault)) if fault.kind == FaultKind::Certificate => {
                    warn!(
                        account_id = account,
                        method = %request.method,
                        path = request.path(),
                        error = %fault.message,
                        "certificate verification failed, repeating once without verification (degraded trust)"
                    );
                    metrics::counter!("arena_degraded_trust_total").increment(1);
                    self.paced_send(request, true).await
                }
                other => other,
            };
            let Some(attempt) = attempt else {
                return Outcome::Cancelled;
            };

            let fault = match attempt {
                Attempt::Response(reply) => {
                    debug!(
                        account_id = account,
                        method = %request.method,
                        path = request.path(),
                        status = reply.status,
                        attempt = failed + 1,
                        "request completed"
                    );
                    return Outcome::Response(reply);
                }
                Attempt::Fault(fault) if !fault.is_retryable() => {
                    error!(
                        account_id = account,
                        method = %request.method,
                        path = request.path(),
                        error = %fault,
                        "request failed, not retryable"
                    );
                    return Outcome::Fatal(fault);
                }
                Attempt::Fault(fault) => fault,
            };

            let delay = self.policy.backoff(failed);
            failed += 1;
            if failed >= self.policy.max_attempts() {
                error!(
                    account_id = account,
                    method = %request.method,
                    path = request.path(),
                    attempts = failed,
                    error = %fault,
                    "request failed after all retries"
                );
                return Outcome::Exhausted {
                    fault,
                    attempts: failed,
                };
            }

            warn!(
                account_id = account,
                method = %request.method,
                path = request.path(),
                attempt = failed,
                delay_ms = delay.as_millis() as u64,
                error = %fault,
                "transient fault, retrying"
            );
            metrics::counter!("arena_request_retries_total").increment(1);
            if !sleep_or_cancel(&self.cancel, delay).await {
                return Outcome::Cancelled;
            }
        }
    }

    /// Throttle, then send once. `None` if cancelled at either wait.
    async fn paced_send(&self, request: &Request, unverified: bool) -> Option<Attempt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            _ = self.limiter.throttle(self.account_id.as_deref()) => {}
        }

        let send = if unverified {
            self.transport.send_unverified(request)
        } else {
            self.transport.send(request)
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            attempt = send => Some(attempt),
        }
    }
}
