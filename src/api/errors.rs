//! API Error Types
//!
//! Errors surfaced to callers of the request client.
//! HTTP status codes are preserved so the UI can decide how to message them.

/// Request client error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 that could not be recovered by a refresh; the session was terminated
    #[error("Authentication expired, session terminated")]
    AuthExpired,

    #[error("HTTP {status}")]
    Http { status: u16, body: String },

    /// No response at all (connect failure, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid JSON in response: {0}")]
    Decode(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Session storage failed: {0}")]
    Storage(String),
}

impl ApiError {
    /// Create an ApiError from a non-success HTTP status and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        ApiError::Http {
            status,
            body: body.to_string(),
        }
    }

    /// Numeric HTTP status, if the backend answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::AuthExpired => Some(401),
            _ => None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }

    /// Backend answered with a 5xx
    pub fn is_server_side(&self) -> bool {
        matches!(self, ApiError::Http { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}
