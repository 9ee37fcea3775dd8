//! Error types for the HTTP session client.

use http::StatusCode;
use posterm::error::SessionError;

/// Errors that can occur while talking to the session-issuance endpoint.
#[derive(Debug, thiserror::Error)]
pub enum SessionClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The API key cannot be sent as a header value.
    #[error("invalid API key header value")]
    InvalidApiKey(#[source] http::header::InvalidHeaderValue),
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl From<SessionClientError> for SessionError {
    fn from(value: SessionClientError) -> Self {
        match value {
            SessionClientError::HttpStatus { status, body, .. } => Self::Rejected {
                status: status.as_u16(),
                body,
            },
            SessionClientError::JsonDeserialization { .. } => Self::Decode(value.to_string()),
            SessionClientError::UrlParse { .. }
            | SessionClientError::InvalidApiKey(_)
            | SessionClientError::Http { .. }
            | SessionClientError::ResponseBodyRead { .. } => Self::Transport(value.to_string()),
        }
    }
}
