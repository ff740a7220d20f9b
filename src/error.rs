//! Error types for configuration and provider calls.

use thiserror::Error;

/// Startup failure: the process must not go on to build a provider.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The API credential is absent or blank.
    #[error("API key not found: set {var} in the environment or in a .env file")]
    MissingCredential {
        /// Environment variable that was consulted.
        var: String,
    },

    /// A setting is present but unusable.
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting {
        /// Dotted configuration key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Layered configuration could not be built or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Failure during a single chat turn.
///
/// Carries strings rather than transport errors so it can be cloned into
/// stream items and compared in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the credential.
    #[error("authentication failed ({status}): {message}")]
    Auth {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// Rate limit or quota exhausted.
    #[error("quota exceeded: {message}")]
    Quota {
        /// Provider message.
        message: String,
    },

    /// Any other non-success HTTP status.
    #[error("provider returned {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// Connection, TLS or transfer failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be understood.
    #[error("malformed provider response: {0}")]
    Decode(String),

    /// The provider refused to answer.
    #[error("response blocked: {reason}")]
    Blocked {
        /// Block or finish reason reported by the provider.
        reason: String,
    },

    /// The provider answered with no text.
    #[error("provider returned an empty response")]
    Empty,
}

impl ProviderError {
    /// Short machine-readable code used in SSE error events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Quota { .. } => "quota",
            Self::Http { .. } => "http",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
            Self::Blocked { .. } => "blocked",
            Self::Empty => "empty",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
