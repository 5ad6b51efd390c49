//! Provider error type.

use thiserror::Error;

/// Failure of a single chat completion call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection, DNS, TLS or body-read failure.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-2xx status from the endpoint.
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not a chat completion response.
    #[error("failed to decode LLM response: {0}")]
    Decode(String),

    /// A well-formed response with no choices.
    #[error("LLM returned no choices")]
    EmptyResponse,

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Auth failures, malformed requests, and undecodable bodies are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => !matches!(status, 400 | 401 | 403 | 404),
            ProviderError::Decode(_) => false,
            ProviderError::Http(_) | ProviderError::EmptyResponse | ProviderError::Timeout(_) => {
                true
            }
        }
    }
}
