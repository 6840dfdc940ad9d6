//! Worker pool: one session unit task per account
//!
//! Units share the transport, the rate limiter, the checkpoint store and the
//! status board, and observe one cancellation token. Nothing else is shared,
//! so a unit that is banned, panics, or reaches its quota ends alone and is
//! never restarted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arena_accounts::{Account, Checkpoint};
use arena_session::{
    ExitReason, GameApi, Reporter, SessionConfig, SessionState, SessionUnit, UnitReport,
    WorkerRuntimeState,
};
use pacing::{RateLimiter, sleep_or_cancel};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use transport::{Executor, RetryPolicy, Transport};

use crate::error::{Error, Result};

/// Everything a unit needs besides its account.
#[derive(Clone)]
pub struct UnitDeps {
    pub transport: Arc<dyn Transport>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub base_url: String,
    pub session: Arc<SessionConfig>,
    pub checkpoint: Arc<dyn Checkpoint>,
    pub reporter: Arc<dyn Reporter>,
}

pub struct Orchestrator {
    deps: UnitDeps,
    stagger: Duration,
    cancel: CancellationToken,
    tasks: JoinSet<UnitReport>,
    accounts: HashMap<Id, Account>,
    finished: Vec<UnitReport>,
    live: Arc<AtomicUsize>,
}

/// Counts a unit as running until dropped, panics included.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn enter(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("arena_units_running").increment(1.0);
        RunningGuard(live)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("arena_units_running").decrement(1.0);
    }
}

impl Orchestrator {
    pub fn new(deps: UnitDeps, stagger: Duration) -> Self {
        Self {
            deps,
            stagger,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
            accounts: HashMap::new(),
            finished: Vec::new(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Units that have not exited yet, including those still waiting out
    /// their start stagger.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Live count of units past their stagger and not yet exited.
    pub fn live_units(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }

    /// Launch one unit per account, skipping quarantined accounts, up to
    /// `cap` units. Launches are staggered; `start` itself does not wait.
    /// Returns the number of units started.
    pub fn start(&mut self, accounts: Vec<Account>, cap: usize) -> Result<usize> {
        if !self.tasks.is_empty() {
            return Err(Error::AlreadyRunning(self.tasks.len()));
        }

        let (quarantined, eligible): (Vec<_>, Vec<_>) =
            accounts.into_iter().partition(Account::is_quarantined);
        for account in &quarantined {
            info!(account_id = %account.id, "skipping quarantined account");
        }
        if eligible.len() > cap {
            warn!(
                eligible = eligible.len(),
                cap,
                "more runnable accounts than the concurrency cap, extra accounts not started"
            );
        }

        let mut started = 0;
        for (slot, account) in eligible.into_iter().take(cap).enumerate() {
            let delay = self.stagger.saturating_mul(u32::try_from(slot).unwrap_or(u32::MAX));
            self.spawn_unit(account, delay);
            started += 1;
        }
        info!(started, skipped_quarantined = quarantined.len(), "orchestrator started");
        Ok(started)
    }

    fn spawn_unit(&mut self, account: Account, delay: Duration) {
        let deps = self.deps.clone();
        let cancel = self.cancel.clone();
        let live = self.live.clone();
        let snapshot = account.clone();
        deps.reporter.register(&account.id);

        let handle = self.tasks.spawn(async move {
            if !sleep_or_cancel(&cancel, delay).await {
                return UnitReport {
                    account,
                    runtime: WorkerRuntimeState::default(),
                    matches_played: 0,
                    final_state: SessionState::LoggedOut,
                    exit: ExitReason::Cancelled,
                };
            }
            let _running = RunningGuard::enter(live);

            let executor = Executor::new(deps.transport, deps.limiter, deps.retry, cancel)
                .for_account(account.id.clone());
            let api = GameApi::new(executor, deps.base_url);
            SessionUnit::new(account, api, deps.session, deps.checkpoint, deps.reporter)
                .run()
                .await
        });
        self.accounts.insert(handle.id(), snapshot);
    }

    /// Wait for every unit to exit on its own. Cancel-safe: reports collected
    /// before the future is dropped are kept for the next `wait` or `stop`.
    pub async fn wait(&mut self) -> Vec<UnitReport> {
        self.drain().await;
        std::mem::take(&mut self.finished)
    }

    /// Raise the shared cancellation signal and wait up to `timeout` for every
    /// unit to exit. Units still running after the timeout are aborted.
    pub async fn stop(&mut self, timeout: Duration) -> Vec<UnitReport> {
        info!(running = self.running(), "stopping session units");
        self.cancel.cancel();

        if tokio::time::timeout(timeout, self.drain()).await.is_err() {
            warn!(
                remaining = self.tasks.len(),
                timeout_secs = timeout.as_secs(),
                "units did not stop in time, aborting"
            );
            self.tasks.abort_all();
            self.drain().await;
        }
        std::mem::take(&mut self.finished)
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            let report = self.settle(joined);
            self.finished.push(report);
        }
    }

    fn settle(&mut self, joined: std::result::Result<(Id, UnitReport), JoinError>) -> UnitReport {
        match joined {
            Ok((id, report)) => {
                self.accounts.remove(&id);
                report
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "unit panicked".to_string()
                } else {
                    "unit aborted during shutdown".to_string()
                };
                let account = self.accounts.remove(&e.id());
                let Some(account) = account else {
                    // Unreachable in practice: every spawned id is recorded.
                    error!(error = %e, "unknown unit task failed");
                    return orphan_report(reason);
                };
                error!(account_id = %account.id, reason, "session unit failed");
                self.deps.reporter.report(&account.id, &format!("failed: {reason}"));
                UnitReport {
                    account,
                    runtime: WorkerRuntimeState::default(),
                    matches_played: 0,
                    final_state: SessionState::LoggedOut,
                    exit: ExitReason::Failed(reason),
                }
            }
        }
    }
}

fn orphan_report(reason: String) -> UnitReport {
    UnitReport {
        account: Account::new("unknown", "unknown", ""),
        runtime: WorkerRuntimeState::default(),
        matches_played: 0,
        final_state: SessionState::LoggedOut,
        exit: ExitReason::Failed(reason),
    }
}
