//! Error types for index retrieval

use crate::resilience::Retryable;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Request did not complete within the configured timeout
    #[error("Timeout after {timeout_ms}ms (url: {url})")]
    Timeout { url: String, timeout_ms: u64 },

    /// Server answered with a non-success status
    #[error("HTTP status {status} (url: {url})")]
    HttpStatus { url: String, status: u16 },

    /// Could not connect at all
    #[error("Connection refused: {message} (url: {url})")]
    ConnectionRefused { url: String, message: String },

    /// Other transport failure (body read, TLS, redirect loop)
    #[error("Transport error: {message} (url: {url})")]
    Transport { url: String, message: String },

    /// Target element is absent; upstream markup probably changed
    #[error("Selector '{selector}' not found in response from {url}")]
    SelectorNotFound { url: String, selector: String },

    /// Selector string itself does not parse
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::HttpStatus { .. } => true,
            FetchError::ConnectionRefused { .. } => true,
            FetchError::Transport { .. } => true,

            FetchError::SelectorNotFound { .. } => false,
            FetchError::InvalidSelector { .. } => false,
        }
    }
}

impl FetchError {
    /// Map a reqwest failure onto the fetch taxonomy
    pub fn from_reqwest(url: &str, timeout_ms: u64, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else if err.is_connect() {
            FetchError::ConnectionRefused {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}
