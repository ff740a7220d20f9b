//! Scripted [`ChatProvider`] for tests.
//!
//! Replies are consumed in order; once the script is exhausted the
//! fallback reply (if any) is repeated. Every history the provider is
//! asked to complete is recorded so callers can check what was sent.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::error::ProviderError;

use super::{ChatProvider, FragmentStream, Message};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A successful reply. Streamed in fragments of `chunk_chars` characters.
    Text(String),
    /// Fails before any text is produced.
    Error(ProviderError),
    /// Streams `fragments`, then fails with `error`. A complete call fails outright.
    Interrupted {
        /// Fragments emitted before the failure.
        fragments: Vec<String>,
        /// Error ending the stream.
        error: ProviderError,
    },
}

/// In-memory provider with a queue of scripted replies.
#[derive(Debug)]
pub struct MockProvider {
    model: String,
    chunk_chars: usize,
    replies: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    /// Provider answering with `replies` in order.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            model: "mock-model".to_string(),
            chunk_chars: 4,
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Provider answering with the given texts in order.
    #[must_use]
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| MockReply::Text(t.into())))
    }

    /// Provider that always gives the same reply.
    #[must_use]
    pub fn repeating(reply: MockReply) -> Self {
        let mut provider = Self::new([]);
        provider.fallback = Some(reply);
        provider
    }

    /// Fragment size used when streaming [`MockReply::Text`].
    #[must_use]
    pub fn chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    /// Histories received so far, oldest first.
    #[must_use]
    pub fn seen_histories(&self) -> Vec<Vec<Message>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self, history: &[Message]) -> MockReply {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(history.to_vec());

        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or(MockReply::Error(ProviderError::Empty))
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect()
    }
}

#[async_trait::async_trait]
impl ChatProvider for MockProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, history: &[Message]) -> Result<String, ProviderError> {
        match self.next_reply(history) {
            MockReply::Text(text) if text.is_empty() => Err(ProviderError::Empty),
            MockReply::Text(text) => Ok(text),
            MockReply::Error(error) | MockReply::Interrupted { error, .. } => Err(error),
        }
    }

    async fn complete_stream(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let items: Vec<Result<String, ProviderError>> = match self.next_reply(history) {
            MockReply::Text(text) => self.split(&text).into_iter().map(Ok).collect(),
            MockReply::Error(error) => return Err(error),
            MockReply::Interrupted { fragments, error } => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(error)))
                .collect(),
        };

        Ok(Box::pin(futures::stream::iter(items)))
    }
}
