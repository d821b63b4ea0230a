//! Transport error taxonomy and HTTP error classification.
//!
//! Every failure crossing the transport boundary is normalized exactly once
//! into a [`TransportError`] and never re-wrapped afterwards. The taxonomy is
//! closed: `network`, `auth`, `validation`, `server`, `unknown`.

use serde_json::Value;

/// Coarse error category, stable across all transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No response reached the client (connect failure, timeout, stream cut).
    Network,
    /// HTTP 401/403.
    Auth,
    /// HTTP 400.
    Validation,
    /// HTTP 5xx.
    Server,
    /// Anything else, including client-side bugs.
    Unknown,
}

impl ErrorCategory {
    /// Stable lowercase label for logs and UI surfaces.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized transport error.
///
/// Carries a human-readable message plus the original HTTP status and
/// provider error code (when present) for diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request never produced a response: DNS/connect failures, timeouts,
    /// broken streams.
    #[error("network error: {message}")]
    Network { message: String },

    /// The endpoint rejected the credential (HTTP 401/403).
    #[error("authentication failed: {message}")]
    Auth { message: String, status: u16 },

    /// The endpoint rejected the request shape (HTTP 400).
    #[error("invalid request: {message}")]
    Validation { message: String, status: u16 },

    /// The endpoint failed internally (HTTP 5xx).
    #[error("server error: {message}")]
    Server { message: String, status: u16 },

    /// Everything else.
    #[error("unexpected error: {message}")]
    Unknown {
        message: String,
        status: Option<u16>,
        code: Option<String>,
    },
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// A cooperative cancellation initiated by the caller.
    ///
    /// Not a network fault (a response may never have been attempted) and
    /// not a server fault, so it lands in the `unknown` bucket with a
    /// recognizable message.
    pub fn cancelled() -> Self {
        Self::unknown("exchange cancelled")
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::Auth { .. } => ErrorCategory::Auth,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Original HTTP status, when a response was received.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { .. } => None,
            Self::Auth { status, .. }
            | Self::Validation { status, .. }
            | Self::Server { status, .. } => Some(*status),
            Self::Unknown { status, .. } => *status,
        }
    }

    /// Whether a fresh attempt could plausibly succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Server { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::network(format!("request timed out: {e}"));
        }
        if e.is_connect() || e.is_request() {
            return Self::network(format!("connection error: {e}"));
        }
        Self::Unknown {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
            code: None,
        }
    }
}

/// Classify an HTTP error response into the closed taxonomy.
///
/// Status mapping: 401/403 are auth, 400 is validation, 5xx is server,
/// anything else is unknown. The message is extracted from the OpenAI
/// error envelope (`{"error": {"message", "type", "code"}}`) when the body
/// matches it; otherwise the raw body (or the status line) is used.
pub fn classify_http_error(status: u16, body_text: &str) -> TransportError {
    let (message, code) = extract_error_envelope(body_text)
        .unwrap_or_else(|| (fallback_message(status, body_text), None));

    match status {
        401 | 403 => TransportError::Auth { message, status },
        400 => TransportError::Validation { message, status },
        s if s >= 500 => TransportError::Server { message, status },
        _ => TransportError::Unknown {
            message,
            status: Some(status),
            code,
        },
    }
}

/// Pull `message` and `code` out of the OpenAI-style error envelope.
///
/// Returns `None` when the body is not JSON or lacks the envelope so the
/// caller can fall back to the raw body.
fn extract_error_envelope(body_text: &str) -> Option<(String, Option<String>)> {
    let json: Value = serde_json::from_str(body_text).ok()?;
    let error_obj = json.get("error")?;

    let message = error_obj
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string();
    let code = error_obj.get("code").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    Some((message, code))
}

fn fallback_message(status: u16, body_text: &str) -> String {
    let trimmed = body_text.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_maps_to_auth_with_envelope_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let err = classify_http_error(401, body);
        match err {
            TransportError::Auth { message, status } => {
                assert_eq!(message, "Incorrect API key provided");
                assert_eq!(status, 401);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(classify_http_error(403, "{}").category(), ErrorCategory::Auth);
    }

    #[test]
    fn status_400_maps_to_validation() {
        let err = classify_http_error(400, r#"{"error":{"message":"bad shape"}}"#);
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.status_code(), Some(400));
    }

    #[test]
    fn status_5xx_maps_to_server_and_is_retryable() {
        for status in [500, 502, 503] {
            let err = classify_http_error(status, "oops");
            assert_eq!(err.category(), ErrorCategory::Server);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn other_statuses_map_to_unknown_and_keep_the_code() {
        let body = r#"{"error":{"message":"slow down","code":429}}"#;
        let err = classify_http_error(429, body);
        match err {
            TransportError::Unknown { status, code, .. } => {
                assert_eq!(status, Some(429));
                assert_eq!(code.as_deref(), Some("429"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn non_envelope_body_falls_back_to_raw_text() {
        let err = classify_http_error(500, "upstream exploded");
        match err {
            TransportError::Server { message, .. } => {
                assert_eq!(message, "HTTP 500: upstream exploded");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn network_errors_carry_no_status() {
        let err = TransportError::network("no route to host");
        assert_eq!(err.status_code(), None);
        assert!(err.is_retryable());
    }
}
