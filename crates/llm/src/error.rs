//! Construction errors and HTTP failure classification.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

use pipeline::BackendError;

/// Failure to construct a backend. Call-time failures are
/// [`pipeline::BackendError`]s.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The backend's name is empty.
    #[error("backend name must not be empty")]
    EmptyName,

    /// The configured API-key variable is unset or blank.
    #[error("backend '{backend}' has no API key: set {variable}")]
    MissingApiKey {
        /// The backend being built.
        backend: String,
        /// The environment variable it reads.
        variable: String,
    },

    /// Prices must be finite and non-negative.
    #[error("backend '{backend}' has invalid pricing")]
    InvalidPricing {
        /// The backend being built.
        backend: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Longest response excerpt carried in an error message.
const EXCERPT_CHARS: usize = 300;

/// Classifies a non-success response.
pub(crate) fn from_status(status: StatusCode, headers: &HeaderMap, body: &str) -> BackendError {
    let message = format!("HTTP {status}: {}", excerpt(body));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        BackendError::Transient {
            message,
            retry_after: retry_after(headers),
        }
    } else {
        BackendError::Permanent { message }
    }
}

/// Classifies a transport failure. `timeout` is the client's configured limit.
pub(crate) fn from_transport(err: &reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { after: timeout }
    } else if err.is_builder() {
        BackendError::permanent(format!("invalid request: {err}"))
    } else {
        BackendError::transient(format!("request failed: {err}"))
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= EXCERPT_CHARS {
        body.to_owned()
    } else {
        let cut: String = body.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}…")
    }
}
