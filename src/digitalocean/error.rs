//! Error types for the DigitalOcean API client.

use thiserror::Error;

/// Errors raised by the DigitalOcean API client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DigitalOceanError {
    /// Raised when the client cannot be constructed from its configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the HTTP request itself fails (connect, TLS, timeout).
    #[error("request to {path} failed: {message}")]
    Http {
        /// API path that was requested.
        path: String,
        /// Transport error reported by the HTTP client.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{path} returned {status} ({id}): {message}")]
    Api {
        /// API path that was requested.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Error identifier from the response body, such as `not_found`.
        id: String,
        /// Error message from the response body.
        message: String,
    },
    /// Raised when a response body does not match the expected schema.
    #[error("failed to decode {path} response: {message}")]
    Decode {
        /// API path that was requested.
        path: String,
        /// Deserialisation error.
        message: String,
    },
}

impl DigitalOceanError {
    /// Returns `true` when the API reported that the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}
