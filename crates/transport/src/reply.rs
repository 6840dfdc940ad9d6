//! Remote responses and status classification
//!
//! The executor never interprets status codes. `StatusClass` is what the
//! session state machine matches on to decide between ban, cooldown and soft
//! failure.

use serde::de::DeserializeOwned;

/// Body substituted when the status line arrived but the body could not be read.
pub const READ_FAILED_BODY: &str = r#"{"error":"response read failed"}"#;

/// Coarse meaning of an HTTP status for the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx (and any 1xx/3xx that reached us): the step went through.
    Success,
    /// 403: the remote considers the account banned or the phase closed.
    Banned,
    /// 429: slow down, retry the step later.
    RateLimited,
    /// 5xx
    ServerError,
    /// Any other 4xx.
    ClientError,
}

/// Map a status code to its class.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        403 => StatusClass::Banned,
        429 => StatusClass::RateLimited,
        500..=599 => StatusClass::ServerError,
        400..=499 => StatusClass::ClientError,
        _ => StatusClass::Success,
    }
}

/// A response: status code plus the full body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Synthetic 500 used when the body stream failed after the status line.
    pub fn read_failed() -> Self {
        Self::new(500, READ_FAILED_BODY)
    }

    pub fn class(&self) -> StatusClass {
        classify_status(self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. Empty or malformed bodies yield `None`.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_str(&self.body).ok()
    }

    /// Parse the body as a generic JSON value (`Value::Null` for `null`).
    pub fn json_value(&self) -> Option<serde_json::Value> {
        self.json()
    }

    /// Body truncated for status lines and logs.
    pub fn snippet(&self, max: usize) -> &str {
        match self.body.char_indices().nth(max) {
            Some((idx, _)) => &self.body[..idx],
            None => &self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_403_is_ban() {
        assert_eq!(classify_status(403), StatusClass::Banned);
    }

    #[test]
    fn classify_status_429_is_rate_limited() {
        assert_eq!(classify_status(429), StatusClass::RateLimited);
    }

    #[test]
    fn classify_status_5xx_is_server_error() {
        for status in [500, 502, 503, 504, 599] {
            assert_eq!(classify_status(status), StatusClass::ServerError, "{status}");
        }
    }

    #[test]
    fn classify_status_other_4xx_is_client_error() {
        for status in [400, 401, 404, 408, 418] {
            assert_eq!(classify_status(status), StatusClass::ClientError, "{status}");
        }
    }

    #[test]
    fn classify_status_2xx_is_success() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
    }

    #[test]
    fn json_parses_body_or_none() {
        let reply = Reply::new(200, r#"{"token":"abc","player_id":7}"#);
        let value = reply.json_value().unwrap();
        assert_eq!(value["token"], "abc");

        assert!(Reply::new(200, "").json_value().is_none());
        assert!(Reply::new(200, "<html>").json_value().is_none());
        assert_eq!(Reply::new(200, "null").json_value(), Some(serde_json::Value::Null));
    }

    #[test]
    fn read_failed_is_server_error_with_error_field() {
        let reply = Reply::read_failed();
        assert_eq!(reply.class(), StatusClass::ServerError);
        assert_eq!(reply.json_value().unwrap()["error"], "response read failed");
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let reply = Reply::new(400, "ééééé");
        assert_eq!(reply.snippet(2), "éé");
        assert_eq!(reply.snippet(50), "ééééé");
    }
}
