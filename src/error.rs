//! Error types for the vulndigest crate.
//!
//! [`FeedError`] covers everything that can go wrong while talking to an
//! upstream feed; [`AppError`] is the HTTP-facing error that maps onto a
//! status code and a JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors raised while fetching or decoding an upstream feed.
///
/// These never escape the aggregator: a failing source contributes an empty
/// result to the merged set (soft-failure policy).
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Upstream returned a non-success HTTP status.
    #[error("source '{source_name}' fetch failed: {message}")]
    SourceFetch {
        /// Name of the source that failed (e.g., "NVD", "CISA").
        source_name: String,
        /// Description of what went wrong.
        message: String,
    },

    /// HTTP request failed (network, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// XML deserialization failed (KISA RSS).
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// A date string from an upstream payload did not parse.
    #[error("invalid date '{value}': {message}")]
    DateParse {
        /// The raw date string as received.
        value: String,
        /// Why parsing failed.
        message: String,
    },
}

/// A specialized Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

impl FeedError {
    /// Create a new source fetch error.
    pub fn source_fetch(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceFetch {
            source_name: source.into(),
            message: message.into(),
        }
    }

    /// Create a new date parse error.
    pub fn date_parse(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DateParse {
            value: value.into(),
            message: message.into(),
        }
    }
}

/// JSON error body returned by the HTTP layer.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Application error type mapping to HTTP status codes.
///
/// Validation failures are client errors (400); everything unexpected is a
/// 500 with a generic message so internals never leak to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_error_display() {
        let err = FeedError::source_fetch("NVD", "HTTP 503");
        assert_eq!(err.to_string(), "source 'NVD' fetch failed: HTTP 503");
    }

    #[test]
    fn validation_error_maps_to_400() {
        let response = AppError::Validation("apiKey is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_maps_to_500() {
        let response = AppError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
