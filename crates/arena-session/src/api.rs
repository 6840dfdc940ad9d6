//! Remote game protocol mapping
//!
//! One method per logical step. Each method builds the request, runs it
//! through the unit's `Executor`, and maps the `Outcome` onto the step
//! failure taxonomy:
//!
//! - `Cancelled` → `Error::Cancelled`
//! - `Exhausted` / `Fatal` → `Error::Soft`
//! - 403 → `Error::Banned`, 429 → `Error::RateLimited`
//! - other non-2xx and unparseable bodies → `Error::Soft`
//!
//! The pick steps return the raw `Reply` instead, since a 403 there closes
//! the pick phase rather than banning the account.

use common::Secret;
use serde_json::{Value, json};
use tracing::debug;
use transport::{Executor, Outcome, Reply, Request, StatusClass};

use crate::error::{Error, Result};
use crate::state::MatchContext;

/// Tokens shorter than this are treated as a failed login.
pub const MIN_TOKEN_LEN: usize = 16;

/// Side assumed when a located match omits `action_side`.
pub const DEFAULT_SIDE: &str = "left";

/// Scripted action kinds submitted during a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Start,
    TurnStart,
    TurnEnd,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Start => "Start",
            ActionKind::TurnStart => "TurnStart",
            ActionKind::TurnEnd => "TurnEnd",
        }
    }
}

/// Identity returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub player_id: String,
    pub display_name: Option<String>,
}

/// A match located by polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedMatch {
    pub match_id: String,
    pub action_side: Option<String>,
}

pub struct GameApi {
    executor: Executor,
    base_url: String,
    token: Option<Secret<String>>,
    player_id: Option<String>,
}

impl GameApi {
    pub fn new(executor: Executor, base_url: impl Into<String>) -> Self {
        Self {
            executor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            player_id: None,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&Secret<String>> {
        self.token.as_ref()
    }

    /// Forget the token and player id.
    pub fn clear_session(&mut self) {
        self.token = None;
        self.player_id = None;
    }

    pub async fn login(&mut self, username: &str, password: &Secret<String>) -> Result<LoginGrant> {
        // A stale token is never reused, even if this attempt fails.
        self.clear_session();

        let request = Request::post(self.url("/session")).json(json!({
            "username": username,
            "password": password.expose(),
            "auto_create": false,
        }));
        let reply = self.call(&request, "login").await?;

        match reply.class() {
            StatusClass::Banned => return Err(Error::Banned("login returned 403".into())),
            StatusClass::RateLimited => return Err(Error::RateLimited("login")),
            _ if !reply.is_success() => {
                return Err(Error::Soft(format!("login failed: HTTP {}", reply.status)));
            }
            _ => {}
        }

        let body = reply
            .json_value()
            .ok_or_else(|| Error::Soft("login response was not JSON".into()))?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Banned(format!("login rejected: {}", value_text(error))));
        }

        let token = body
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| t.len() >= MIN_TOKEN_LEN)
            .ok_or_else(|| Error::Soft("login returned a missing or short token".into()))?;
        let player_id = body
            .get("player_id")
            .and_then(id_text)
            .ok_or_else(|| Error::Soft("login response had no player id".into()))?;
        let display_name = body
            .get("display_name")
            .and_then(Value::as_str)
            .map(str::to_string);

        self.token = Some(Secret::new(token.to_string()));
        self.player_id = Some(player_id.clone());
        debug!(player_id = %player_id, token_len = token.len(), "login accepted");
        Ok(LoginGrant {
            player_id,
            display_name,
        })
    }

    pub async fn acquire_entitlement(&self) -> Result<()> {
        let pid = self.require_player()?;
        let request = self.authed(Request::post(self.url(&format!("/draft/{pid}"))));
        let reply = self.call(&request, "entitlement").await?;
        expect_success(&reply, "entitlement")
    }

    /// Fetch the current pick options. Status interpretation is left to the caller.
    pub async fn pick_options(&self) -> Result<Reply> {
        let pid = self.require_player()?;
        let request = self.authed(Request::get(self.url(&format!("/draft/{pid}/deck"))));
        self.call(&request, "pick").await
    }

    /// Submit one pick. Status interpretation is left to the caller.
    pub async fn submit_pick(&self, pick: u32) -> Result<Reply> {
        let pid = self.require_player()?;
        let request = self.authed(
            Request::put(self.url(&format!("/draft/{pid}/deck"))).json(json!({ "pick": pick })),
        );
        self.call(&request, "pick").await
    }

    pub async fn request_match(&self) -> Result<()> {
        let pid = self.require_player()?;
        let request = self.authed(Request::post(self.url("/lobby")).json(json!({
            "player_id": pid,
            "deck_id": 0,
        })));
        let reply = self.call(&request, "match request").await?;
        expect_success(&reply, "match request")
    }

    /// Poll the match-status endpoint once. `Ok(None)` means no match yet.
    pub async fn poll_match(&self) -> Result<Option<LocatedMatch>> {
        let request = self.authed(Request::get(self.url("/matches")));
        let reply = self.call(&request, "match poll").await?;
        expect_success(&reply, "match poll")?;
        Ok(parse_located_match(&reply))
    }

    pub async fn submit_action(&self, ctx: &mut MatchContext, kind: ActionKind) -> Result<()> {
        let pid = self.require_player()?;
        let action_data = match kind {
            ActionKind::Start => json!({ "player_id": pid }),
            ActionKind::TurnStart | ActionKind::TurnEnd => json!({ "side": ctx.side }),
        };
        let action_id = ctx.next_action_id;
        let request = self.authed(
            Request::post(self.url(&format!("/matches/{}/actions", ctx.match_id))).json(json!({
                "action_id": action_id,
                "action_type": kind.as_str(),
                "player_id": pid,
                "action_data": action_data,
            })),
        );
        let reply = self.call(&request, "action").await?;
        // The id is spent once the remote has seen it, whatever it answered.
        ctx.advance();
        expect_success(&reply, "action")
    }

    pub async fn end_match(&self, ctx: &MatchContext, timeout: std::time::Duration) -> Result<()> {
        let pid = self.require_player()?;
        let request = self
            .authed(
                Request::put(self.url(&format!("/matches/{}", ctx.match_id))).json(json!({
                    "side": "",
                    "action": "end-match",
                    "value": {
                        "winner_id": pid,
                        "winner_side": ctx.side,
                        "result": "victory",
                    },
                })),
            )
            .timeout(timeout);
        let reply = self.call(&request, "match end").await?;
        expect_success(&reply, "match end")
    }

    pub async fn claim_reward(&self) -> Result<()> {
        let pid = self.require_player()?;
        let request = self.authed(Request::delete(self.url(&format!("/draft/{pid}"))));
        let reply = self.call(&request, "reward claim").await?;
        expect_success(&reply, "reward claim")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: Request) -> Request {
        request.bearer(self.token.clone())
    }

    fn require_player(&self) -> Result<&str> {
        match (&self.token, &self.player_id) {
            (Some(_), Some(pid)) => Ok(pid),
            _ => Err(Error::Soft("not logged in".into())),
        }
    }

    async fn call(&self, request: &Request, step: &'static str) -> Result<Reply> {
        match self.executor.execute(request).await {
            Outcome::Response(reply) => Ok(reply),
            Outcome::Cancelled => Err(Error::Cancelled),
            outcome @ (Outcome::Exhausted { .. } | Outcome::Fatal(_)) => {
                Err(Error::Soft(format!("{step} failed: {}", outcome.describe())))
            }
        }
    }
}

/// Map a non-2xx reply onto the step taxonomy.
pub fn expect_success(reply: &Reply, step: &'static str) -> Result<()> {
    match reply.class() {
        StatusClass::Banned => Err(Error::Banned(format!("{step} returned 403"))),
        StatusClass::RateLimited => Err(Error::RateLimited(step)),
        _ if reply.is_success() => Ok(()),
        _ => Err(Error::Soft(format!("{step} failed: HTTP {}", reply.status))),
    }
}

/// Extract `match_data.match` from a poll reply; `null` or no id yields `None`.
pub fn parse_located_match(reply: &Reply) -> Option<LocatedMatch> {
    let body = reply.json_value()?;
    let current = body.get("match_data")?.get("match")?;
    let match_id = current.get("match_id").and_then(id_text)?;
    let action_side = current
        .get("action_side")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Some(LocatedMatch {
        match_id,
        action_side,
    })
}

/// Ids arrive as strings or numbers.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_success_mapping() {
        assert_eq!(expect_success(&Reply::new(200, ""), "x"), Ok(()));
        assert_eq!(
            expect_success(&Reply::new(403, ""), "match request"),
            Err(Error::Banned("match request returned 403".into()))
        );
        assert_eq!(
            expect_success(&Reply::new(429, ""), "match poll"),
            Err(Error::RateLimited("match poll"))
        );
        assert!(matches!(expect_success(&Reply::new(500, ""), "x"), Err(Error::Soft(_))));
        assert!(matches!(expect_success(&Reply::new(404, ""), "x"), Err(Error::Soft(_))));
    }

    #[test]
    fn parses_located_match() {
        let reply = Reply::new(
            200,
            r#"{"match_data":{"match":{"match_id":12345,"action_side":"right"}}}"#,
        );
        assert_eq!(
            parse_located_match(&reply),
            Some(LocatedMatch {
                match_id: "12345".into(),
                action_side: Some("right".into()),
            })
        );
    }

    #[test]
    fn null_or_partial_poll_is_no_match() {
        assert_eq!(parse_located_match(&Reply::new(200, "null")), None);
        assert_eq!(parse_located_match(&Reply::new(200, "null\n")), None);
        assert_eq!(parse_located_match(&Reply::new(200, r#"{"match_data":{}}"#)), None);
        assert_eq!(
            parse_located_match(&Reply::new(200, r#"{"match_data":{"match":{"match_id":""}}}"#)),
            None
        );
        assert_eq!(parse_located_match(&Reply::new(200, "garbage")), None);
    }

    #[test]
    fn missing_side_is_none() {
        let reply = Reply::new(200, r#"{"match_data":{"match":{"match_id":"m-1"}}}"#);
        assert_eq!(parse_located_match(&reply).unwrap().action_side, None);
    }

    #[test]
    fn action_kind_names() {
        assert_eq!(ActionKind::Start.as_str(), "Start");
        assert_eq!(ActionKind::TurnStart.as_str(), "TurnStart");
        assert_eq!(ActionKind::TurnEnd.as_str(), "TurnEnd");
    }

    mod login {
        use super::*;
        use crate::testing::ScriptedTransport;
        use pacing::{PacingPolicy, RateLimiter};
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;
        use transport::{Method, RetryPolicy, Transport};

        fn api(transport: Arc<ScriptedTransport>) -> GameApi {
            let transport: Arc<dyn Transport> = transport;
            let executor = Executor::new(
                transport,
                Arc::new(RateLimiter::new(PacingPolicy::unpaced())),
                RetryPolicy::default(),
                CancellationToken::new(),
            );
            GameApi::new(executor, "http://arena.test/")
        }

        fn answering(status: u16, body: &str) -> GameApi {
            let t = ScriptedTransport::new();
            t.respond(Method::POST, "/session", status, body);
            api(t)
        }

        fn password() -> Secret<String> {
            Secret::new("hunter2".to_string())
        }

        #[tokio::test(start_paused = true)]
        async fn accepted_login_stores_session() {
            let mut api = answering(
                200,
                r#"{"token":"tok-0123456789abcdef","player_id":42,"display_name":"Alice"}"#,
            );
            let grant = api.login("alice", &password()).await.unwrap();
            assert_eq!(grant.player_id, "42");
            assert_eq!(grant.display_name.as_deref(), Some("Alice"));
            assert!(api.has_token());
            assert_eq!(api.player_id(), Some("42"));
            assert_eq!(api.token().unwrap().expose(), "tok-0123456789abcdef");
        }

        #[tokio::test(start_paused = true)]
        async fn short_token_is_soft_failure() {
            let mut api = answering(200, r#"{"token":"abc","player_id":"p-1"}"#);
            assert!(matches!(api.login("alice", &password()).await, Err(Error::Soft(_))));
            assert!(!api.has_token());
        }

        #[tokio::test(start_paused = true)]
        async fn error_body_is_ban() {
            let mut api = answering(200, r#"{"error":"account suspended"}"#);
            assert_eq!(
                api.login("alice", &password()).await,
                Err(Error::Banned("login rejected: account suspended".into()))
            );
        }

        #[tokio::test(start_paused = true)]
        async fn status_codes_map_to_taxonomy() {
            let mut api = answering(403, "");
            assert!(matches!(api.login("a", &password()).await, Err(Error::Banned(_))));
            let mut api = answering(429, "");
            assert_eq!(api.login("a", &password()).await, Err(Error::RateLimited("login")));
            let mut api = answering(502, "");
            assert!(matches!(api.login("a", &password()).await, Err(Error::Soft(_))));
            let mut api = answering(200, "<html>");
            assert!(matches!(api.login("a", &password()).await, Err(Error::Soft(_))));
        }

        #[tokio::test(start_paused = true)]
        async fn failed_relogin_drops_old_token() {
            let t = ScriptedTransport::new();
            t.respond_once(Method::POST, "/session", 200, r#"{"token":"tok-0123456789abcdef","player_id":"p-1"}"#);
            t.respond(Method::POST, "/session", 500, "");
            let mut api = api(t.clone());

            api.login("alice", &password()).await.unwrap();
            assert!(api.login("alice", &password()).await.is_err());
            assert!(!api.has_token());
            assert!(matches!(api.claim_reward().await, Err(Error::Soft(_))));
            // The claim never reached the wire.
            assert_eq!(t.call_count(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn transport_faults_become_soft_failures() {
            let t = ScriptedTransport::new();
            t.fail(
                Method::POST,
                "/session",
                transport::Fault::new(transport::FaultKind::Connect, "connection refused"),
            );
            let mut api = api(t.clone());
            assert!(matches!(api.login("alice", &password()).await, Err(Error::Soft(_))));
            // One attempt plus three retries.
            assert_eq!(t.call_count(), 4);
        }
    }
}
