//! Error types and handling for the completion gateway.
//!
//! Each layer has its own error type; all of them are converted to
//! [`AppError`] at the handler boundary, which maps them to the plain-text
//! HTTP responses callers see. Internal details are logged, never returned.

use crate::core::config::ProviderKind;
use crate::core::rate_limiter::RateDecision;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub const BODY_BAD_REQUEST: &str = "Bad Request";
pub const BODY_PAYLOAD_TOO_LARGE: &str = "Payload Too Large";
pub const BODY_RATE_LIMITED: &str = "Rate limit exceeded";
pub const BODY_INTERNAL: &str = "Internal Server Error";

/// Failures of a text-generation provider call or its stream.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider's API key was not configured
    #[error("No API key configured for provider {0}")]
    MissingApiKey(ProviderKind),

    /// Transport-level failure talking to the provider
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("Provider returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The provider's stream could not be decoded
    #[error("Malformed provider stream: {0}")]
    Decode(String),
}

/// Failures of the rate-limit store.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Rate limit store returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Unexpected rate limit store response: {0}")]
    Decode(String),
}

/// Main error type for request handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Request body missing `prompt` or not the expected JSON shape
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request body exceeded the configured body limit
    #[error("Request body too large")]
    PayloadTooLarge,

    /// Sliding-window check denied the request
    #[error("Rate limit exceeded")]
    RateLimitExceeded(RateDecision),

    /// The rate-limit store could not answer
    #[error(transparent)]
    RateLimitStore(#[from] RateLimitError),

    /// The provider call failed before streaming started
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_)
            | AppError::RateLimitStore(_)
            | AppError::Provider(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            AppError::RateLimitExceeded(decision) => {
                let mut response = (status, BODY_RATE_LIMITED).into_response();
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
                headers.insert(
                    "x-ratelimit-reset",
                    HeaderValue::from(decision.reset_at.timestamp_millis()),
                );
                response
            }
            AppError::BadRequest(detail) => {
                tracing::warn!(error = %detail, "Rejected malformed completion request");
                plain_text(status, BODY_BAD_REQUEST)
            }
            AppError::PayloadTooLarge => plain_text(status, BODY_PAYLOAD_TOO_LARGE),
            other => {
                tracing::error!(error = %other, "Error processing request");
                plain_text(status, BODY_INTERNAL)
            }
        }
    }
}

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
