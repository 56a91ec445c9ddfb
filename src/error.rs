//! Error taxonomy for the translation proxy.
//!
//! Every error a client can observe maps to one [`ErrorCategory`], which in
//! turn maps to an HTTP status code and a JSON error body.

#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Stable error category surfaced to clients, independent of the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    RateLimited,
    Locked,
    Unauthorized,
    Forbidden,
    ModelNotFound,
    ContextLengthExceeded,
    BadRequest,
    GatewayError,
    GatewayHtml,
    Timeout,
    ConnectionError,
    ServerError,
    UnknownError,
}

impl ErrorCategory {
    pub fn status(self) -> u16 {
        match self {
            ErrorCategory::RateLimited => 429,
            ErrorCategory::Locked => 429,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::Forbidden => 403,
            ErrorCategory::ModelNotFound => 404,
            ErrorCategory::ContextLengthExceeded => 400,
            ErrorCategory::BadRequest => 400,
            ErrorCategory::GatewayError | ErrorCategory::GatewayHtml => 502,
            ErrorCategory::Timeout => 504,
            ErrorCategory::ConnectionError => 502,
            ErrorCategory::ServerError => 500,
            ErrorCategory::UnknownError => 500,
        }
    }
}

/// Classify an upstream HTTP status and body into an [`ErrorCategory`].
///
/// The gateway-HTML narrowing exists because some upstream load balancers
/// return an HTML error page with a 502/503 status instead of JSON; callers
/// want to tell that apart from a well-formed JSON gateway error.
pub fn classify_upstream(status: u16, body: &str) -> ErrorCategory {
    match status {
        401 => ErrorCategory::Unauthorized,
        403 => ErrorCategory::Forbidden,
        404 => ErrorCategory::ModelNotFound,
        400 => {
            let lower = body.to_ascii_lowercase();
            if lower.contains("context") && (lower.contains("length") || lower.contains("token")) {
                ErrorCategory::ContextLengthExceeded
            } else {
                ErrorCategory::BadRequest
            }
        }
        502 | 503 => {
            let trimmed = body.trim_start();
            if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
                ErrorCategory::GatewayHtml
            } else {
                ErrorCategory::GatewayError
            }
        }
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::UnknownError,
    }
}

/// The error type threaded through the whole request path.
#[derive(Debug, Clone)]
pub enum ProxyError {
    RateLimited { wait_seconds: f64 },
    Locked { remaining_seconds: u64 },
    Upstream { category: ErrorCategory, message: String },
    BadRequest(String),
    Internal(String),
}

impl ProxyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProxyError::RateLimited { .. } => ErrorCategory::RateLimited,
            ProxyError::Locked { .. } => ErrorCategory::Locked,
            ProxyError::Upstream { category, .. } => *category,
            ProxyError::BadRequest(_) => ErrorCategory::BadRequest,
            ProxyError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ProxyError::RateLimited { wait_seconds } => format!("Wait {:.1}s", wait_seconds),
            ProxyError::Locked { remaining_seconds } => {
                format!("Try again in {}s", remaining_seconds)
            }
            ProxyError::Upstream { message, .. } => message.clone(),
            ProxyError::BadRequest(msg) => msg.clone(),
            ProxyError::Internal(msg) => msg.clone(),
        }
    }

    /// Append a parenthesized hint to the message, e.g. an auth limiter's
    /// attempts-remaining count. No-op on variants with a fixed message
    /// format (`RateLimited`, `Locked`) since those are already derived
    /// from structured fields rather than free text.
    pub fn with_hint(self, hint: String) -> Self {
        match self {
            ProxyError::Upstream { category, message } => ProxyError::Upstream {
                category,
                message: format!("{message} ({hint})"),
            },
            ProxyError::BadRequest(message) => ProxyError::BadRequest(format!("{message} ({hint})")),
            ProxyError::Internal(message) => ProxyError::Internal(format!("{message} ({hint})")),
            other => other,
        }
    }

    /// Render as the `{"error": {...}}` body shared by both the batch and
    /// streaming response surfaces.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "type": self.category(),
                "message": self.message(),
            }
        })
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.category(), self.message())
    }
}

impl std::error::Error for ProxyError {}

#[cfg(feature = "server")]
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.category().status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Upstream {
                category: ErrorCategory::Timeout,
                message: "upstream request timed out".to_string(),
            }
        } else if err.is_connect() {
            ProxyError::Upstream {
                category: ErrorCategory::ConnectionError,
                message: "could not connect to upstream".to_string(),
            }
        } else {
            ProxyError::Upstream {
                category: ErrorCategory::UnknownError,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::BadRequest(format!("invalid JSON: {}", err))
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        ProxyError::BadRequest(format!("invalid URL: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_errors() {
        assert_eq!(classify_upstream(401, ""), ErrorCategory::Unauthorized);
        assert_eq!(classify_upstream(403, ""), ErrorCategory::Forbidden);
    }

    #[test]
    fn classifies_context_length() {
        assert_eq!(
            classify_upstream(400, "This model's maximum context length is 4096 tokens"),
            ErrorCategory::ContextLengthExceeded
        );
        assert_eq!(classify_upstream(400, "missing field"), ErrorCategory::BadRequest);
    }

    #[test]
    fn narrows_gateway_html() {
        assert_eq!(
            classify_upstream(502, "<html><body>Bad Gateway</body></html>"),
            ErrorCategory::GatewayHtml
        );
        assert_eq!(
            classify_upstream(502, "{\"error\":\"bad gateway\"}"),
            ErrorCategory::GatewayError
        );
    }

    #[test]
    fn with_hint_appends_to_upstream_message() {
        let err = ProxyError::Upstream {
            category: ErrorCategory::Unauthorized,
            message: "invalid credentials".to_string(),
        }
        .with_hint("2 attempts left".to_string());
        assert_eq!(err.message(), "invalid credentials (2 attempts left)");
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ErrorCategory::RateLimited.status(), 429);
        assert_eq!(ErrorCategory::Locked.status(), 429);
        assert_eq!(ErrorCategory::Timeout.status(), 504);
        assert_eq!(ErrorCategory::ConnectionError.status(), 502);
    }
}
