//! Classified errors for the list API client and storage layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class driving the cooldown policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials rejected or missing. Blocks fetching until fresh
    /// credentials are captured.
    Auth,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// Other HTTP 4xx.
    BadRequest,
    /// Request never produced an HTTP response.
    NetworkError,
    /// Response body was not valid JSON.
    ParseError,
    /// Anything else. No cooldown is applied.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ErrorKind::Auth)
    }
}

/// Error raised by the list API client. The display form is what gets
/// persisted as the user-facing last-error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    /// HTTP status, 0 when the request never reached the server.
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, 0, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, 0, message)
    }

    pub fn is_auth(&self) -> bool {
        self.kind.is_auth()
    }
}

/// Classify an unsuccessful HTTP status.
pub fn classify_status(status: u16) -> ErrorKind {
    if status == 401 || status == 403 {
        return ErrorKind::Auth;
    }
    if status == 429 {
        return ErrorKind::RateLimited;
    }
    if status >= 500 {
        return ErrorKind::ServerError;
    }
    if status >= 400 {
        return ErrorKind::BadRequest;
    }
    ErrorKind::Unknown
}

/// Classify an application-level error message (GraphQL `errors` payloads
/// arrive with HTTP 200, so the status alone says nothing).
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("auth")
        || lower.contains("authorization")
        || lower.contains("csrf")
        || lower.contains("token")
        || lower.contains("login")
    {
        return ErrorKind::Auth;
    }
    ErrorKind::Unknown
}
