//! Error types for logic-quorum.

use thiserror::Error;

/// Result type alias using logic-quorum's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the verification pipeline.
///
/// The first five variants are transport-level and originate in the model
/// invocation layer; `MalformedResponse` is contract-level and originates in
/// the structured response parser.
#[derive(Error, Debug)]
pub enum Error {
    /// Request exceeded the per-attempt timeout
    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Authentication or authorization failure at a provider
    #[error("authentication failed for {provider}: {message}")]
    Auth { provider: String, message: String },

    /// Provider signalled a rate limit (HTTP 429)
    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    /// Provider returned an error response
    #[error("provider error from {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Transport failure before a response was received
    #[error("network error: {0}")]
    Network(String),

    /// Model reply violated the required-field structural contract
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run record storage error
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an authentication error.
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a rate-limit error.
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the invoker should back off and retry this error internally.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
