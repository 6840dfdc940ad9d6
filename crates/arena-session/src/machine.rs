//! Session unit: the async driver of one account's state machine
//!
//! A unit logs in, runs cycles (entitlement → matches → reward claim) until
//! its cycle quota is reached, the account is quarantined, or cancellation is
//! observed. Every wait goes through `sleep_or_cancel`, and the executor
//! observes the same token, so a cancelled unit exits within one suspension.
//!
//! Failure handling is delegated to `state::plan_recovery`; this module only
//! executes the plan. Checkpoints are written after every cycle (completed or
//! abandoned) and once more on exit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arena_accounts::{Account, Checkpoint};
use pacing::sleep_or_cancel;
use rand::RngExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ActionKind, DEFAULT_SIDE, GameApi, LocatedMatch};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::reporter::Reporter;
use crate::state::{MatchContext, Recovery, SessionState, WorkerRuntimeState, plan_recovery};

/// Pause between the two halves of a scripted turn.
const ACTION_PAUSE: Duration = Duration::from_millis(500);

/// Why a unit stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// `max_cycles` completed.
    QuotaReached,
    Quarantined(String),
    Cancelled,
    /// The unit's task died (panic or join failure). Set by the orchestrator.
    Failed(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::QuotaReached => f.write_str("cycle quota reached"),
            ExitReason::Quarantined(reason) => write!(f, "quarantined: {reason}"),
            ExitReason::Cancelled => f.write_str("cancelled"),
            ExitReason::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Final summary of a unit's run.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub account: Account,
    pub runtime: WorkerRuntimeState,
    pub matches_played: u64,
    pub final_state: SessionState,
    pub exit: ExitReason,
}

pub struct SessionUnit {
    account: Account,
    api: GameApi,
    config: Arc<SessionConfig>,
    checkpoint: Arc<dyn Checkpoint>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
    state: SessionState,
    runtime: WorkerRuntimeState,
    matches_played: u64,
}

impl SessionUnit {
    /// The unit observes the cancellation token of the api's executor.
    pub fn new(
        account: Account,
        api: GameApi,
        config: Arc<SessionConfig>,
        checkpoint: Arc<dyn Checkpoint>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let cancel = api.executor().cancel_token().clone();
        Self {
            account,
            api,
            config,
            checkpoint,
            reporter,
            cancel,
            state: SessionState::LoggedOut,
            runtime: WorkerRuntimeState::default(),
            matches_played: 0,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the account until it stops, then write a final checkpoint.
    pub async fn run(mut self) -> UnitReport {
        let exit = self.drive().await;
        self.save_checkpoint().await;

        let progress = &self.account.progress;
        info!(
            account_id = %self.account.id,
            exit = %exit,
            cycles = self.runtime.cycles_completed,
            matches = self.matches_played,
            total_sessions = progress.total_sessions,
            "session unit stopped"
        );
        self.say(&format!(
            "stopped ({exit}): {} cycles, {} matches this run",
            self.runtime.cycles_completed, self.matches_played
        ));

        UnitReport {
            account: self.account,
            runtime: self.runtime,
            matches_played: self.matches_played,
            final_state: self.state,
            exit,
        }
    }

    async fn drive(&mut self) -> ExitReason {
        if self.account.is_quarantined() {
            self.state = SessionState::Quarantined;
            let reason = self
                .account
                .quarantine_reason
                .clone()
                .unwrap_or_else(|| "quarantined".to_string());
            return ExitReason::Quarantined(reason);
        }

        loop {
            if self.cancel.is_cancelled() {
                return ExitReason::Cancelled;
            }
            if self.quota_reached() {
                return ExitReason::QuotaReached;
            }

            if !self.api.has_token() || self.runtime.needs_login(Instant::now(), &self.config) {
                if let Err(e) = self.login().await {
                    if let Some(exit) = self.recover(Err(e)).await {
                        return exit;
                    }
                    continue;
                }
            }

            let result = self.run_cycle().await;
            match &result {
                Ok(()) => {
                    self.runtime.record_cycle();
                    metrics::counter!("arena_cycles_total", "result" => "completed").increment(1);
                }
                Err(Error::Cancelled) => {}
                Err(_) => {
                    metrics::counter!("arena_cycles_total", "result" => "failed").increment(1);
                }
            }
            if !matches!(result, Err(Error::Banned(_))) {
                self.transition(SessionState::Idle);
            }
            self.save_checkpoint().await;

            if result.is_ok() && self.quota_reached() {
                return ExitReason::QuotaReached;
            }
            if let Some(exit) = self.recover(result).await {
                return exit;
            }
        }
    }

    /// Apply the recovery plan for a login or cycle result.
    /// Returns the exit reason when the unit must stop.
    async fn recover(&mut self, result: Result<()>) -> Option<ExitReason> {
        if let Err(Error::Soft(_)) = &result {
            self.runtime.consecutive_failures += 1;
        }
        let failures = self.runtime.consecutive_failures;

        let wait = match plan_recovery(&result, failures, &self.config) {
            Recovery::Continue { delay } => {
                let wait = delay.sample();
                self.say(&format!("next cycle in {:.0}s", wait.as_secs_f64()));
                wait
            }
            Recovery::CoolDown { delay } => {
                self.say(&format!("rate limited, cooling down {}s", delay.as_secs()));
                delay
            }
            Recovery::Backoff {
                delay,
                force_relogin,
            } => {
                let wait = delay.sample();
                if let Err(e) = &result {
                    warn!(
                        account_id = %self.account.id,
                        consecutive_failures = failures,
                        delay_ms = wait.as_millis() as u64,
                        error = %e,
                        "cycle failed, backing off"
                    );
                    self.say(&format!(
                        "{e}; failure #{failures}, retrying in {:.0}s",
                        wait.as_secs_f64()
                    ));
                }
                if force_relogin {
                    self.runtime.force_relogin = true;
                }
                wait
            }
            Recovery::Quarantine { reason } => {
                self.quarantine(&reason);
                return Some(ExitReason::Quarantined(reason));
            }
            Recovery::Stop => return Some(ExitReason::Cancelled),
        };

        match self.pause(wait).await {
            Ok(()) => None,
            Err(_) => Some(ExitReason::Cancelled),
        }
    }

    async fn login(&mut self) -> Result<()> {
        self.transition(SessionState::LoggingIn);
        self.account.token = None;
        self.say("logging in");

        match self.api.login(&self.account.username, &self.account.password).await {
            Ok(grant) => {
                self.account.token = self.api.token().cloned();
                self.account.player_id = Some(grant.player_id);
                if self.account.display_name.is_none() {
                    self.account.display_name = grant.display_name;
                }
                self.account.mark_good();
                self.runtime.record_login(Instant::now());
                self.transition(SessionState::Idle);
                self.say("logged in");
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::LoggedOut);
                if !matches!(e, Error::Cancelled) {
                    self.say(&format!("login failed: {e}"));
                }
                Err(e)
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<()> {
        let target = self.config.matches_per_cycle;

        if self.account.has_entitlement {
            let progress = &self.account.progress;
            self.say(&format!(
                "cycle {}: entitlement held, resuming at match {}/{target}",
                progress.current_session_round,
                (progress.current_session_games + 1).min(target)
            ));
        } else {
            let progress = &mut self.account.progress;
            progress.current_session_round += 1;
            progress.current_game_in_round = 0;
            progress.current_session_games = 0;
            self.acquire_entitlement().await?;
            self.pause(self.config.step_delay()).await?;
        }

        let start = self.account.progress.current_session_games;
        for game in start..target {
            let number = game + 1;
            self.account.progress.current_game_in_round = number;
            self.play_match(number, target).await?;

            if number < target {
                let wait = self.config.match_delay().sample();
                self.say(&format!("next match in {:.1}s", wait.as_secs_f64()));
                self.pause(wait).await?;
            }
        }

        self.claim_reward().await
    }

    async fn acquire_entitlement(&mut self) -> Result<()> {
        self.transition(SessionState::AcquiringEntitlement);
        self.say(&format!(
            "cycle {}: acquiring entitlement",
            self.account.progress.current_session_round
        ));
        self.api.acquire_entitlement().await?;
        self.pause(self.config.step_delay()).await?;

        self.transition(SessionState::Picking);
        if self.pick_loop().await? {
            self.account.grant_entitlement();
        } else {
            self.say("no pick went through, entitlement left unmarked");
        }
        Ok(())
    }

    /// Bounded pick loop. Returns whether the entitlement is usable.
    ///
    /// A 403 closes the pick phase (it is not a ban here). Other per-round
    /// failures are logged and the loop moves on.
    async fn pick_loop(&mut self) -> Result<bool> {
        let total = self.config.pick_count;
        let mut picked = false;

        for round in 1..=total {
            match self.api.pick_options().await {
                Ok(reply) if reply.status == 403 => {
                    self.say(&format!("pick phase closed at round {round}/{total}"));
                    return Ok(picked);
                }
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(account_id = %self.account.id, round, error = %e, "pick options failed");
                    continue;
                }
            }

            self.pause(self.config.pick_delay_secs.sample()).await?;
            let pick = rand::rng().random_range(0..self.config.pick_options);

            match self.api.submit_pick(pick).await {
                Ok(reply) if reply.status == 403 => {
                    self.say(&format!("pick phase closed at round {round}/{total}"));
                    return Ok(true);
                }
                Ok(reply) if reply.is_success() => {
                    picked = true;
                    self.say(&format!("pick {round}/{total}"));
                }
                Ok(reply) => {
                    self.say(&format!("pick {round}/{total} rejected: HTTP {}", reply.status));
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    self.say(&format!("pick {round}/{total} failed: {e}"));
                }
            }
        }

        Ok(picked)
    }

    async fn play_match(&mut self, number: u32, target: u32) -> Result<()> {
        self.transition(SessionState::MatchRequested);
        self.say(&format!("match {number}/{target}: requesting"));
        self.api.request_match().await?;
        self.pause(self.config.step_delay()).await?;

        self.transition(SessionState::WaitingForMatch);
        let located = self.wait_for_match().await?;
        let side = located.action_side.unwrap_or_else(|| DEFAULT_SIDE.to_string());
        let mut ctx = MatchContext::new(located.match_id, side);

        self.transition(SessionState::InMatch);
        self.say(&format!(
            "match {number}/{target}: playing {} as {}",
            ctx.match_id, ctx.side
        ));
        self.play_script(&mut ctx).await?;

        self.transition(SessionState::EndingMatch);
        if let Err(e) = self.api.end_match(&ctx, self.config.end_match_timeout()).await {
            metrics::counter!("arena_matches_total", "result" => "end_failed").increment(1);
            return Err(e);
        }

        // The scripted outcome always names this side the winner.
        let progress = &mut self.account.progress;
        progress.total_games += 1;
        progress.total_wins += 1;
        progress.current_session_games = number;
        self.matches_played += 1;
        metrics::counter!("arena_matches_total", "result" => "won").increment(1);
        self.say(&format!(
            "match {number}/{target} won in {}s",
            ctx.started_at.elapsed().as_secs()
        ));
        Ok(())
    }

    /// Poll until a match id appears or the match timeout elapses.
    async fn wait_for_match(&mut self) -> Result<LocatedMatch> {
        let timeout = self.config.match_timeout();
        let deadline = Instant::now() + timeout;
        self.say(&format!("waiting for opponent (up to {}s)", timeout.as_secs()));

        loop {
            match self.api.poll_match().await {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => {}
                Err(e @ (Error::Banned(_) | Error::Cancelled)) => return Err(e),
                Err(e) => debug!(account_id = %self.account.id, error = %e, "match poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.config.match_poll_interval().min(deadline - now);
            self.pause(wait).await?;
        }

        metrics::counter!("arena_matches_total", "result" => "no_opponent").increment(1);
        Err(Error::Soft(format!(
            "no opponent found within {}s",
            timeout.as_secs()
        )))
    }

    /// Scripted play: a start action, then per turn wait for our side and
    /// submit turn-start + turn-end. Every step is best-effort; only a ban
    /// or cancellation stops the script.
    async fn play_script(&mut self, ctx: &mut MatchContext) -> Result<()> {
        let result = self.api.submit_action(ctx, ActionKind::Start).await;
        self.best_effort(result, "start action")?;
        self.pause(ACTION_PAUSE).await?;

        let turns = self.config.turns;
        for turn in 1..=turns {
            self.await_turn(ctx).await?;

            let result = self.api.submit_action(ctx, ActionKind::TurnStart).await;
            self.best_effort(result, "turn start")?;
            self.pause(ACTION_PAUSE).await?;

            let result = self.api.submit_action(ctx, ActionKind::TurnEnd).await;
            self.best_effort(result, "turn end")?;

            self.say(&format!("turn {turn}/{turns} done"));
            self.pause(self.config.step_delay()).await?;
        }
        Ok(())
    }

    /// Bounded wait for the match to report our side as acting.
    async fn await_turn(&mut self, ctx: &MatchContext) -> Result<()> {
        for _ in 0..self.config.turn_poll_attempts {
            match self.api.poll_match().await {
                Ok(Some(m)) if m.action_side.as_deref() == Some(ctx.side.as_str()) => return Ok(()),
                Ok(_) => {}
                Err(e @ (Error::Banned(_) | Error::Cancelled)) => return Err(e),
                Err(e) => debug!(account_id = %self.account.id, error = %e, "turn poll failed"),
            }
            self.pause(self.config.match_poll_interval()).await?;
        }
        debug!(account_id = %self.account.id, match_id = %ctx.match_id, "turn wait exhausted, acting anyway");
        Ok(())
    }

    fn best_effort(&self, result: Result<()>, step: &str) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e @ (Error::Banned(_) | Error::Cancelled)) => Err(e),
            Err(e) => {
                debug!(account_id = %self.account.id, step, error = %e, "best-effort step failed");
                Ok(())
            }
        }
    }

    async fn claim_reward(&mut self) -> Result<()> {
        self.transition(SessionState::ClaimingReward);
        self.say("claiming reward");
        self.api.claim_reward().await?;

        let progress = &mut self.account.progress;
        progress.total_sessions += 1;
        progress.current_session_games = 0;
        progress.current_game_in_round = 0;
        self.account.clear_entitlement();
        self.account.mark_good();
        self.say(&format!(
            "cycle complete, {} sessions total",
            self.account.progress.total_sessions
        ));
        Ok(())
    }

    fn quarantine(&mut self, reason: &str) {
        self.transition(SessionState::Quarantined);
        self.runtime.record_ban(reason);
        self.account.quarantine(reason);
        self.api.clear_session();
        metrics::counter!("arena_quarantined_total").increment(1);
        warn!(account_id = %self.account.id, reason, "account quarantined");
        self.say(&format!("quarantined: {reason}"));
    }

    fn quota_reached(&self) -> bool {
        self.config.max_cycles > 0 && self.runtime.cycles_completed >= self.config.max_cycles
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        if sleep_or_cancel(&self.cancel, duration).await {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }

    async fn save_checkpoint(&self) {
        if let Err(e) = self.checkpoint.save(&self.account).await {
            warn!(account_id = %self.account.id, error = %e, "checkpoint failed");
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                account_id = %self.account.id,
                from = self.state.label(),
                to = next.label(),
                "state transition"
            );
            self.state = next;
        }
    }

    fn say(&self, message: &str) {
        self.reporter.report(&self.account.id, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCheckpoint, RecordingReporter, ScriptedTransport};
    use arena_accounts::AccountStatus;
    use pacing::{DelayRange, PacingPolicy, RateLimiter};
    use transport::{Executor, Method, RetryPolicy, Transport};

    struct Harness {
        transport: Arc<ScriptedTransport>,
        checkpoint: Arc<MemoryCheckpoint>,
        reporter: Arc<RecordingReporter>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(transport: Arc<ScriptedTransport>) -> Self {
            Self {
                transport,
                checkpoint: MemoryCheckpoint::new(),
                reporter: RecordingReporter::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn unit(&self, account: Account, config: SessionConfig) -> SessionUnit {
            let transport: Arc<dyn Transport> = self.transport.clone();
            let executor = Executor::new(
                transport,
                Arc::new(RateLimiter::new(PacingPolicy::unpaced())),
                RetryPolicy::default(),
                self.cancel.clone(),
            )
            .for_account(account.id.clone());
            SessionUnit::new(
                account,
                GameApi::new(executor, "http://arena.test/"),
                Arc::new(config),
                self.checkpoint.clone(),
                self.reporter.clone(),
            )
        }

        fn cancel_after(&self, secs: u64) {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                cancel.cancel();
            });
        }

        fn logins(&self) -> usize {
            self.transport.count(&Method::POST, "/session")
        }
    }

    fn account() -> Account {
        Account::new("acct-1", "alice", "hunter2")
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            max_cycles: 1,
            pick_delay_secs: DelayRange::ZERO,
            step_delay_secs: 0.0,
            match_delay_secs: 0.0,
            cycle_delay_secs: 0,
            ..SessionConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_reaches_quota() {
        let h = Harness::new(ScriptedTransport::happy_path("p-1"));
        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::QuotaReached);
        assert_eq!(report.final_state, SessionState::Idle);
        assert_eq!(report.matches_played, 3);
        assert_eq!(report.runtime.cycles_completed, 1);
        assert_eq!(report.runtime.login_count, 1);

        let t = &h.transport;
        assert_eq!(h.logins(), 1);
        assert_eq!(t.count(&Method::POST, "/draft/p-1"), 1);
        assert_eq!(t.count(&Method::GET, "/draft/p-1/deck"), 10);
        assert_eq!(t.count(&Method::PUT, "/draft/p-1/deck"), 10);
        assert_eq!(t.count(&Method::POST, "/lobby"), 3);
        assert_eq!(t.count(&Method::POST, "/matches/*/actions"), 9);
        assert_eq!(t.count(&Method::PUT, "/matches/*"), 3);
        assert_eq!(t.count(&Method::DELETE, "/draft/p-1"), 1);

        let calls = t.calls();
        assert!(!calls[0].authenticated);
        assert_eq!(calls[0].body.as_ref().unwrap()["auto_create"], false);
        assert!(calls[1..].iter().all(|c| c.authenticated));
        assert_eq!(calls.last().unwrap().method, Method::DELETE);

        let progress = &report.account.progress;
        assert_eq!(progress.total_sessions, 1);
        assert_eq!(progress.total_games, 3);
        assert_eq!(progress.total_wins, 3);
        assert_eq!(progress.current_session_round, 1);
        assert_eq!(progress.current_session_games, 0);
        assert!(!report.account.has_entitlement);
        assert_eq!(report.account.player_id.as_deref(), Some("p-1"));
        assert_eq!(
            report.account.token.as_ref().map(|t| t.expose().as_str()),
            Some("tok-0123456789abcdef")
        );
        assert!(report.account.last_good_at.is_some());

        // Cycle-end checkpoint plus the exit checkpoint.
        assert_eq!(h.checkpoint.saves().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn action_ids_restart_per_match() {
        let h = Harness::new(ScriptedTransport::happy_path("p-1"));
        h.unit(account(), fast_config()).run().await;

        let ids: Vec<u64> = h
            .transport
            .calls()
            .iter()
            .filter(|c| c.method == Method::POST && c.path.ends_with("/actions"))
            .map(|c| c.body.as_ref().unwrap()["action_id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 1, 2, 3, 1, 2, 3]);

        let end = h
            .transport
            .calls()
            .into_iter()
            .find(|c| c.method == Method::PUT && c.path == "/matches/m-1")
            .unwrap();
        let body = end.body.unwrap();
        assert_eq!(body["action"], "end-match");
        assert_eq!(body["value"]["winner_id"], "p-1");
        assert_eq!(body["value"]["winner_side"], "left");
    }

    #[tokio::test(start_paused = true)]
    async fn login_403_quarantines_after_one_call() {
        let t = ScriptedTransport::new();
        t.respond(Method::POST, "/session", 403, "");
        let h = Harness::new(t);
        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::Quarantined("login returned 403".into()));
        assert_eq!(report.final_state, SessionState::Quarantined);
        assert!(report.runtime.banned);
        assert_eq!(h.transport.call_count(), 1);

        let saved = h.checkpoint.last().unwrap();
        assert_eq!(saved.status, AccountStatus::Quarantined);
        assert_eq!(saved.quarantine_reason.as_deref(), Some("login returned 403"));
        assert!(saved.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn login_error_body_quarantines() {
        let t = ScriptedTransport::new();
        t.respond(Method::POST, "/session", 200, r#"{"error":"account locked"}"#);
        let h = Harness::new(t);
        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(
            report.exit,
            ExitReason::Quarantined("login rejected: account locked".into())
        );
        assert_eq!(h.transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quarantined_account_makes_no_calls() {
        let h = Harness::new(ScriptedTransport::happy_path("p-1"));
        let mut acct = account();
        acct.quarantine("flagged last week");

        let report = h.unit(acct, fast_config()).run().await;
        assert_eq!(report.exit, ExitReason::Quarantined("flagged last week".into()));
        assert_eq!(report.final_state, SessionState::Quarantined);
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_entitlement_resumes_mid_cycle() {
        let h = Harness::new(ScriptedTransport::happy_path("p-1"));
        let mut acct = account();
        acct.grant_entitlement();
        acct.progress.current_session_round = 4;
        acct.progress.current_session_games = 1;

        let report = h.unit(acct, fast_config()).run().await;
        assert_eq!(report.exit, ExitReason::QuotaReached);

        let t = &h.transport;
        assert_eq!(t.count(&Method::POST, "/draft/p-1"), 0);
        assert_eq!(t.count(&Method::GET, "/draft/p-1/deck"), 0);
        assert_eq!(t.count(&Method::POST, "/lobby"), 2);
        assert_eq!(t.count(&Method::DELETE, "/draft/p-1"), 1);

        let progress = &report.account.progress;
        assert_eq!(progress.current_session_round, 4);
        assert_eq!(progress.total_sessions, 1);
        assert_eq!(progress.total_games, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn match_wait_timeout_keeps_entitlement() {
        let t = ScriptedTransport::happy_path("p-1");
        t.respond(Method::GET, "/matches", 200, "null");
        let h = Harness::new(t);
        h.cancel_after(15);

        let config = SessionConfig {
            match_timeout_secs: 10,
            ..fast_config()
        };
        let report = h.unit(account(), config).run().await;

        assert_eq!(report.exit, ExitReason::Cancelled);
        assert_eq!(report.final_state, SessionState::Idle);
        assert_eq!(report.runtime.consecutive_failures, 1);
        assert_eq!(h.transport.count(&Method::POST, "/lobby"), 1);
        assert_eq!(h.transport.count(&Method::DELETE, "/draft/p-1"), 0);
        assert_eq!(h.transport.count(&Method::POST, "/matches/*/actions"), 0);

        let saved = h.checkpoint.last().unwrap();
        assert!(saved.has_entitlement);
        assert_eq!(saved.progress.current_session_games, 0);
        assert!(
            h.reporter
                .messages("acct-1")
                .iter()
                .any(|m| m.contains("no opponent found within 10s"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn login_429_cools_down_without_escalating() {
        let t = ScriptedTransport::new();
        t.respond(Method::POST, "/session", 429, "");
        let h = Harness::new(t);
        h.cancel_after(40);

        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::Cancelled);
        assert_eq!(report.final_state, SessionState::LoggedOut);
        assert_eq!(report.runtime.consecutive_failures, 0);
        assert!(!report.runtime.banned);
        // Attempts at 0s, 15s and 30s; cancelled during the third cooldown.
        assert_eq!(h.logins(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_logins_escalate() {
        let t = ScriptedTransport::new();
        t.respond(Method::POST, "/session", 500, "");
        let h = Harness::new(t);
        h.cancel_after(100);

        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::Cancelled);
        let failures = report.runtime.consecutive_failures;
        assert!(failures >= 3, "only {failures} failures");
        assert_eq!(h.logins(), failures as usize);
        assert_eq!(report.runtime.login_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ban_mid_cycle_stops_immediately() {
        let t = ScriptedTransport::happy_path("p-1");
        t.respond(Method::POST, "/lobby", 403, "");
        let h = Harness::new(t);

        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(
            report.exit,
            ExitReason::Quarantined("match request returned 403".into())
        );
        assert_eq!(report.final_state, SessionState::Quarantined);
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 23);
        let last = calls.last().unwrap();
        assert_eq!((last.method.clone(), last.path.as_str()), (Method::POST, "/lobby"));

        let saved = h.checkpoint.last().unwrap();
        assert_eq!(saved.status, AccountStatus::Quarantined);
        assert!(saved.has_entitlement);
    }

    #[tokio::test(start_paused = true)]
    async fn pick_403_closes_phase() {
        let t = ScriptedTransport::happy_path("p-1");
        t.respond(Method::GET, "/draft/p-1/deck", 403, "");
        for _ in 0..3 {
            t.respond_once(Method::GET, "/draft/p-1/deck", 200, "{}");
        }
        let h = Harness::new(t);

        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::QuotaReached);
        assert_eq!(h.transport.count(&Method::GET, "/draft/p-1/deck"), 4);
        assert_eq!(h.transport.count(&Method::PUT, "/draft/p-1/deck"), 3);
        assert_eq!(h.transport.count(&Method::POST, "/lobby"), 3);
        let messages = h.reporter.messages("acct-1");
        assert!(messages.iter().any(|m| m == "pick phase closed at round 4/10"));
        assert!(!messages.iter().any(|m| m.contains("entitlement left unmarked")));
    }

    #[tokio::test(start_paused = true)]
    async fn no_successful_pick_leaves_entitlement_unmarked() {
        let t = ScriptedTransport::happy_path("p-1");
        t.respond(Method::GET, "/draft/p-1/deck", 403, "");
        let h = Harness::new(t);

        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::QuotaReached);
        assert_eq!(h.transport.count(&Method::PUT, "/draft/p-1/deck"), 0);
        assert!(
            h.reporter
                .messages("acct-1")
                .iter()
                .any(|m| m.contains("entitlement left unmarked"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_claim_is_resumed() {
        let t = ScriptedTransport::happy_path("p-1");
        t.respond_once(Method::DELETE, "/draft/p-1", 500, "");
        let h = Harness::new(t);

        let report = h.unit(account(), fast_config()).run().await;

        assert_eq!(report.exit, ExitReason::QuotaReached);
        assert_eq!(h.transport.count(&Method::POST, "/lobby"), 3);
        assert_eq!(h.transport.count(&Method::DELETE, "/draft/p-1"), 2);
        assert_eq!(h.transport.count(&Method::POST, "/draft/p-1"), 1);
        assert_eq!(report.account.progress.total_sessions, 1);
        assert!(!report.account.has_entitlement);

        let saves = h.checkpoint.saves();
        assert!(
            saves
                .iter()
                .any(|a| a.has_entitlement && a.progress.current_session_games == 3)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_cycles_share_one_login() {
        let h = Harness::new(ScriptedTransport::happy_path("p-1"));
        let config = SessionConfig {
            max_cycles: 2,
            ..fast_config()
        };

        let report = h.unit(account(), config).run().await;

        assert_eq!(report.exit, ExitReason::QuotaReached);
        assert_eq!(h.logins(), 1);
        assert_eq!(h.transport.count(&Method::POST, "/draft/p-1"), 2);
        assert_eq!(h.transport.count(&Method::POST, "/lobby"), 6);
        assert_eq!(report.account.progress.total_sessions, 2);
        assert_eq!(report.account.progress.current_session_round, 2);
        assert_eq!(report.runtime.cycles_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_failure_forces_relogin() {
        let t = ScriptedTransport::happy_path("p-1");
        t.respond(Method::GET, "/matches", 200, "null");
        let h = Harness::new(t);
        h.cancel_after(300);

        let config = SessionConfig {
            match_timeout_secs: 2,
            ..fast_config()
        };
        let report = h.unit(account(), config).run().await;
        assert_eq!(report.exit, ExitReason::Cancelled);

        let calls = h.transport.calls();
        let second_login = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.method == Method::POST && c.path == "/session")
            .nth(1)
            .map(|(i, _)| i)
            .expect("a second login");
        let lobby_before = calls[..second_login]
            .iter()
            .filter(|c| c.method == Method::POST && c.path == "/lobby")
            .count();
        assert_eq!(lobby_before, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_exits_promptly() {
        let h = Harness::new(ScriptedTransport::happy_path("p-1"));
        h.cancel_after(5);
        let config = SessionConfig {
            max_cycles: 0,
            ..SessionConfig::default()
        };

        let started = Instant::now();
        let report = h.unit(account(), config).run().await;

        assert_eq!(report.exit, ExitReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(!h.checkpoint.saves().is_empty());
        assert_eq!(h.transport.count(&Method::DELETE, "/draft/p-1"), 0);
    }

    #[test]
    fn exit_reasons_render() {
        assert_eq!(ExitReason::QuotaReached.to_string(), "cycle quota reached");
        assert_eq!(
            ExitReason::Quarantined("login returned 403".into()).to_string(),
            "quarantined: login returned 403"
        );
        assert_eq!(ExitReason::Failed("panicked".into()).to_string(), "failed: panicked");
    }
}
