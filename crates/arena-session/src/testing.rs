//! In-memory collaborators for driving session units in tests
//!
//! `ScriptedTransport` answers by route (`method` + path pattern, `*` matches
//! one segment) and records every request, so tests can assert exact call
//! sequences and zero-call properties. Unrouted requests get a 404.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use arena_accounts::{Account, Checkpoint};
use serde_json::Value;
use transport::{Attempt, Fault, Method, Reply, Request, Transport};

use crate::reporter::Reporter;

/// A request as seen by the scripted transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub authenticated: bool,
}

struct Route {
    method: Method,
    pattern: String,
    queued: VecDeque<Attempt>,
    fallback: Option<Attempt>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every remote step succeeds for `player_id`; the match poll always finds `m-1` on the left.
    pub fn happy_path(player_id: &str) -> Arc<Self> {
        let t = Self::new();
        t.respond(
            Method::POST,
            "/session",
            200,
            &format!(r#"{{"token":"tok-0123456789abcdef","player_id":"{player_id}"}}"#),
        );
        t.respond(Method::POST, &format!("/draft/{player_id}"), 200, "{}");
        t.respond(Method::GET, &format!("/draft/{player_id}/deck"), 200, r#"{"options":[1,2,3]}"#);
        t.respond(Method::PUT, &format!("/draft/{player_id}/deck"), 200, "{}");
        t.respond(Method::POST, "/lobby", 200, "{}");
        t.respond(
            Method::GET,
            "/matches",
            200,
            r#"{"match_data":{"match":{"match_id":"m-1","action_side":"left"}}}"#,
        );
        t.respond(Method::POST, "/matches/*/actions", 200, "{}");
        t.respond(Method::PUT, "/matches/*", 200, "{}");
        t.respond(Method::DELETE, &format!("/draft/{player_id}"), 200, "{}");
        t
    }

    /// Default reply for a route, used once its queue is empty.
    pub fn respond(&self, method: Method, pattern: &str, status: u16, body: &str) {
        self.with_route(method, pattern, |route| {
            route.fallback = Some(Attempt::Response(Reply::new(status, body)));
        });
    }

    /// One-shot reply served before the route's default.
    pub fn respond_once(&self, method: Method, pattern: &str, status: u16, body: &str) {
        self.with_route(method, pattern, |route| {
            route.queued.push_back(Attempt::Response(Reply::new(status, body)));
        });
    }

    /// Default fault for a route.
    pub fn fail(&self, method: Method, pattern: &str, fault: Fault) {
        self.with_route(method, pattern, |route| {
            route.fallback = Some(Attempt::Fault(fault));
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Calls that hit `method` + `pattern`.
    pub fn count(&self, method: &Method, pattern: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| &c.method == method && path_matches(pattern, &c.path))
            .count()
    }

    fn with_route(&self, method: Method, pattern: &str, f: impl FnOnce(&mut Route)) {
        let mut routes = lock(&self.routes);
        let idx = match routes
            .iter()
            .position(|r| r.method == method && r.pattern == pattern)
        {
            Some(idx) => idx,
            None => {
                routes.push(Route {
                    method,
                    pattern: pattern.to_string(),
                    queued: VecDeque::new(),
                    fallback: None,
                });
                routes.len() - 1
            }
        };
        f(&mut routes[idx]);
    }

    fn answer(&self, request: &Request) -> Attempt {
        let path = request.path().to_string();
        lock(&self.calls).push(Call {
            method: request.method.clone(),
            path: path.clone(),
            body: request.body.clone(),
            authenticated: request.bearer.is_some(),
        });

        let mut routes = lock(&self.routes);
        let route = routes
            .iter_mut()
            .find(|r| r.method == request.method && path_matches(&r.pattern, &path));
        match route {
            Some(route) => route
                .queued
                .pop_front()
                .or_else(|| route.fallback.clone())
                .unwrap_or_else(|| Attempt::Response(Reply::new(404, ""))),
            None => Attempt::Response(Reply::new(404, "")),
        }
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(&'a self, request: &'a Request) -> Pin<Box<dyn Future<Output = Attempt> + Send + 'a>> {
        let attempt = self.answer(request);
        Box::pin(async move { attempt })
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').collect();
    let path: Vec<&str> = path.split('/').collect();
    pattern.len() == path.len() && pattern.iter().zip(&path).all(|(p, s)| *p == "*" || p == s)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Checkpoint that keeps every saved record in memory.
#[derive(Default)]
pub struct MemoryCheckpoint {
    saves: Mutex<Vec<Account>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saves(&self) -> Vec<Account> {
        lock(&self.saves).clone()
    }

    pub fn last(&self) -> Option<Account> {
        lock(&self.saves).last().cloned()
    }
}

impl Checkpoint for MemoryCheckpoint {
    fn save<'a>(
        &'a self,
        account: &'a Account,
    ) -> Pin<Box<dyn Future<Output = arena_accounts::Result<()>> + Send + 'a>> {
        lock(&self.saves).push(account.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Reporter that records every line.
#[derive(Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<(String, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self, unit: &str) -> Vec<String> {
        lock(&self.lines)
            .iter()
            .filter(|(u, _)| u == unit)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, unit: &str, message: &str) {
        lock(&self.lines).push((unit.to_string(), message.to_string()));
    }
}
