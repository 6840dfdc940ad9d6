//! Outbound request execution for session units
//!
//! Defines the `Transport` trait that decouples the retry/pacing policy from
//! the wire. `HttpTransport` is the reqwest-backed implementation used in
//! production; tests substitute scripted in-memory transports.
//!
//! The `Executor` wraps a transport with the shared `RateLimiter`, a
//! `RetryPolicy` and a cancellation token, and returns a tagged `Outcome`
//! instead of an error, so callers match every case exhaustively.

pub mod executor;
pub mod fault;
pub mod http;
pub mod reply;

pub use executor::{Executor, Outcome, RetryPolicy};
pub use fault::{Fault, FaultKind};
pub use http::{HeaderInjection, HttpSettings, HttpTransport};
pub use reply::{Reply, StatusClass};
pub use reqwest::Method;

use common::Secret;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Errors building a transport. Per-request failures are reported as `Fault`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One logical remote call.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub bearer: Option<Secret<String>>,
    pub body: Option<serde_json::Value>,
    /// Overrides the transport's read timeout for this call only.
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn bearer(mut self, token: Option<Secret<String>>) -> Self {
        self.bearer = token;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Path component of the URL (everything after the authority, without query).
    pub fn path(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
        path.split('?').next().unwrap_or(path)
    }
}

/// Result of a single attempt on the wire.
#[derive(Debug, Clone)]
pub enum Attempt {
    /// A status line arrived. Any status code, including 4xx/5xx.
    Response(Reply),
    /// No usable response: the connection failed before a status arrived.
    Fault(Fault),
}

/// A single-attempt request sender.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a Request) -> Pin<Box<dyn Future<Output = Attempt> + Send + 'a>>;

    /// Send without certificate verification. Only used to repeat an attempt
    /// whose certificate check failed. Transports without a notion of
    /// certificates send normally.
    fn send_unverified<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Attempt> + Send + 'a>> {
        self.send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_strips_scheme_host_and_query() {
        assert_eq!(Request::get("https://api.example.test/draft/42/deck?x=1").path(), "/draft/42/deck");
        assert_eq!(Request::get("http://127.0.0.1:8080").path(), "/");
        assert_eq!(Request::get("/matches").path(), "/matches");
    }

    #[test]
    fn builders_set_method_and_body() {
        let req = Request::put("http://h/matches/7")
            .json(serde_json::json!({"action": "end-match"}))
            .timeout(Duration::from_secs(10));
        assert_eq!(req.method, Method::PUT);
        assert_eq!(req.body.unwrap()["action"], "end-match");
        assert_eq!(req.timeout, Some(Duration::from_secs(10)));
        assert!(req.bearer.is_none());
    }

    #[test]
    fn bearer_is_redacted_in_debug() {
        let req = Request::get("http://h/").bearer(Some(Secret::new("tok-123456789abcdef".to_string())));
        let debug = format!("{req:?}");
        assert!(!debug.contains("tok-123456789abcdef"));
    }
}
