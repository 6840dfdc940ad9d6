//! Transport fault classification
//!
//! A fault is any attempt that produced no status line. Network-level faults
//! (timeouts, refused/reset connections, TLS handshake trouble) are retryable;
//! anything else, such as a malformed URL or a request that cannot be built,
//! is fatal and surfaces immediately.

use std::error::Error as StdError;
use std::fmt;

/// Fault categories, ordered roughly by how often they occur in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Timeout,
    Connect,
    Reset,
    /// TLS handshake failure unrelated to certificate validation.
    Tls,
    /// Certificate verification failed. The executor repeats the attempt
    /// once without verification before treating this as a fault.
    Certificate,
    Other,
}

impl FaultKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FaultKind::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Timeout => "timeout",
            FaultKind::Connect => "connect",
            FaultKind::Reset => "reset",
            FaultKind::Tls => "tls",
            FaultKind::Certificate => "certificate",
            FaultKind::Other => "other",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed attempt: category plus the underlying error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault: {}", self.kind, self.message)
    }
}

const CERTIFICATE_PATTERNS: &[&str] = &[
    "certificate",
    "unknownissuer",
    "unknown issuer",
    "invalidcertificate",
    "self signed",
    "self-signed",
];

const RESET_PATTERNS: &[&str] = &[
    "connection reset",
    "broken pipe",
    "connection closed",
    "connection aborted",
    "incomplete message",
];

const TLS_PATTERNS: &[&str] = &["handshake", "tls", "ssl"];

/// Classify an error message chain (outermost first, joined and lowercased).
pub fn classify_message(chain: &str) -> Option<FaultKind> {
    let lower = chain.to_lowercase();
    if CERTIFICATE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FaultKind::Certificate);
    }
    if RESET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FaultKind::Reset);
    }
    if TLS_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FaultKind::Tls);
    }
    None
}

/// Full `source()` chain rendered as one string.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// Classify a reqwest error into a `Fault`.
///
/// Certificate problems surface as connect errors, so the message chain is
/// inspected before the coarse `is_connect` flag.
pub fn classify_reqwest(error: &reqwest::Error) -> Fault {
    let chain = error_chain(error);
    let kind = if error.is_timeout() {
        FaultKind::Timeout
    } else if let Some(kind) = classify_message(&chain) {
        kind
    } else if error.is_connect() {
        FaultKind::Connect
    } else if error.is_request() || error.is_body() {
        // Failed mid-flight after the connection was up.
        FaultKind::Reset
    } else {
        FaultKind::Other
    };
    Fault::new(kind, chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_other_is_fatal() {
        for kind in [
            FaultKind::Timeout,
            FaultKind::Connect,
            FaultKind::Reset,
            FaultKind::Tls,
            FaultKind::Certificate,
        ] {
            assert!(kind.is_retryable(), "{kind}");
        }
        assert!(!FaultKind::Other.is_retryable());
    }

    #[test]
    fn certificate_wins_over_handshake() {
        let chain = "error sending request: tls handshake eof: invalid peer certificate: UnknownIssuer";
        assert_eq!(classify_message(chain), Some(FaultKind::Certificate));
    }

    #[test]
    fn reset_patterns() {
        assert_eq!(
            classify_message("Connection reset by peer (os error 104)"),
            Some(FaultKind::Reset)
        );
        assert_eq!(classify_message("Broken pipe"), Some(FaultKind::Reset));
    }

    #[test]
    fn plain_handshake_is_tls() {
        assert_eq!(
            classify_message("received fatal alert: HandshakeFailure"),
            Some(FaultKind::Tls)
        );
    }

    #[test]
    fn unrelated_message_is_unclassified() {
        assert_eq!(classify_message("builder error: relative URL without a base"), None);
    }

    #[test]
    fn error_chain_joins_sources() {
        #[derive(Debug)]
        struct Outer(std::io::Error);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("error sending request")
            }
        }
        impl StdError for Outer {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let err = Outer(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"));
        assert_eq!(error_chain(&err), "error sending request: connection reset");
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();
        let fault = classify_reqwest(&err);
        assert!(fault.is_retryable(), "got {fault}");
    }

    #[tokio::test]
    async fn malformed_url_is_fatal() {
        let err = reqwest::Client::new().get("not a url").send().await.unwrap_err();
        assert_eq!(classify_reqwest(&err).kind, FaultKind::Other);
    }
}
