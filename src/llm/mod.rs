//! Chat provider capability and conversation message types.
//!
//! The [`ChatProvider`] trait is the only seam between the relay and the
//! hosted model. It exposes a one-shot completion and a streamed completion,
//! both taking the full conversation history as context.
//!
//! # Providers
//!
//! - [`GeminiProvider`]: Google Gemini `generateContent` / `streamGenerateContent`
//! - [`MockProvider`]: scripted replies for tests and offline runs
//!
//! # Example
//!
//! ```rust
//! use gemini_chatbot::llm::{Message, Role};
//!
//! let msg = Message::user("Hello");
//! assert_eq!(msg.role(), Role::User);
//! assert_eq!(msg.text(), "Hello");
//! ```

pub mod gemini;
pub mod mock;

pub use gemini::GeminiProvider;
pub use mock::MockProvider;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text submitted by the person chatting.
    User,
    /// Text produced by the model.
    Assistant,
}

impl Role {
    /// Lowercase name used in DTOs and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One conversation turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    text: String,
}

impl Message {
    /// A user turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    /// Author of this message.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Message body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw key. Callers are expected to have rejected blank values.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key for the outbound request header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Connection and model settings for [`GeminiProvider`].
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    /// Base URL, without the `/v1beta` path.
    pub base_url: url::Url,
    /// Model identifier such as `gemini-1.5-flash`.
    pub model: String,
    /// API key.
    pub credential: Credential,
    /// Optional system instruction sent with every request.
    pub system_instruction: Option<String>,
    /// Optional sampling temperature.
    pub temperature: Option<f32>,
    /// Optional cap on generated tokens.
    pub max_output_tokens: Option<u32>,
    /// TCP connect timeout.
    pub connect_timeout: std::time::Duration,
    /// Longest silence tolerated between response bytes.
    pub read_timeout: std::time::Duration,
}

/// Incremental text fragments of one streamed completion.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Capability to complete a conversation against a hosted model.
///
/// `history` always ends with the user turn being answered; implementations
/// send all of it and never truncate.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Model identifier, for logs and the health endpoint.
    fn model(&self) -> &str;

    /// Request a complete reply.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport failure, a non-success status,
    /// or an empty or blocked completion.
    async fn complete(&self, history: &[Message]) -> Result<String, ProviderError>;

    /// Request a streamed reply.
    ///
    /// The outer error covers failures before the first byte; failures after
    /// that arrive as stream items.
    async fn complete_stream(&self, history: &[Message]) -> Result<FragmentStream, ProviderError>;
}
