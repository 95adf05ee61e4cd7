//! Error taxonomy for every call made through the client.
//!
//! A single [`Error`] enum covers the whole request lifecycle. The variants
//! separate "the caller gave up" ([`Error::Cancelled`]) from "the call was too
//! slow" ([`Error::Timeout`]), network failures from classified upstream
//! responses ([`Error::Api`]), and malformed event streams
//! ([`Error::Decode`]). Only failures of the network send itself are
//! retried; see [`crate::api::retry`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while sending a request or reading a stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// The per-attempt deadline elapsed before the operation finished.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Network-level failure reported by the HTTP transport.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status or an `error` stream event.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The event stream was malformed, out of order or cut short.
    #[error("stream decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A request could not be encoded or a response body could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client was misconfigured (missing key, bad base URL).
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The upstream classification, if this is an API error.
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Error::Api(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

// ── Upstream API errors ────────────────────────────────────────────

/// Closed classification of upstream failures, keyed on HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RequestTooLarge,
    RateLimit,
    /// 500, or any status outside the known set.
    Api,
    Overloaded,
}

impl ApiErrorKind {
    /// Map an HTTP status code to its classification.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ApiErrorKind::InvalidRequest,
            401 => ApiErrorKind::Authentication,
            403 => ApiErrorKind::Permission,
            404 => ApiErrorKind::NotFound,
            413 => ApiErrorKind::RequestTooLarge,
            429 => ApiErrorKind::RateLimit,
            529 => ApiErrorKind::Overloaded,
            _ => ApiErrorKind::Api,
        }
    }

    /// Map the `error.type` string of an error body (used for mid-stream
    /// `error` events, which carry no status code).
    pub fn from_error_type(error_type: &str) -> Self {
        match error_type {
            "invalid_request_error" => ApiErrorKind::InvalidRequest,
            "authentication_error" => ApiErrorKind::Authentication,
            "permission_error" => ApiErrorKind::Permission,
            "not_found_error" => ApiErrorKind::NotFound,
            "request_too_large" => ApiErrorKind::RequestTooLarge,
            "rate_limit_error" => ApiErrorKind::RateLimit,
            "overloaded_error" => ApiErrorKind::Overloaded,
            _ => ApiErrorKind::Api,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiErrorKind::InvalidRequest => "invalid request",
            ApiErrorKind::Authentication => "authentication failed",
            ApiErrorKind::Permission => "permission denied",
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::RequestTooLarge => "request too large",
            ApiErrorKind::RateLimit => "rate limited",
            ApiErrorKind::Api => "API error",
            ApiErrorKind::Overloaded => "overloaded",
        };
        f.write_str(s)
    }
}

/// A classified upstream failure.
#[derive(Debug, Clone, Error)]
#[error("{kind} (HTTP {status}): {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, or `200` for an `error` event inside a successful stream.
    pub status: u16,
    /// Upstream `error.type` string, empty when the body had none.
    pub error_type: String,
    pub message: String,
    /// Pretty-printed JSON of the offending request (invalid-request only).
    pub request: Option<String>,
}

// ── Stream decode errors ───────────────────────────────────────────

/// Why an event stream could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed `{event}` payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown event type `{0}`")]
    UnknownEvent(String),

    #[error("event out of order: {0}")]
    OutOfOrder(String),

    #[error("stream is not valid UTF-8")]
    InvalidUtf8,

    #[error("stream ended before message_stop")]
    Incomplete,
}
