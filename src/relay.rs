//! Relay between a chat session and a [`ChatProvider`].
//!
//! A turn always follows the same order:
//! 1. Append the user message to the session
//! 2. Ask the provider to complete the *entire* history
//! 3. Append the assistant message, only if a complete, non-empty reply arrived
//!
//! A failed turn therefore leaves the user message in place and adds nothing
//! else, and the session stays usable for the next submission.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gemini_chatbot::llm::MockProvider;
//! use gemini_chatbot::relay::Relay;
//! use gemini_chatbot::session::Session;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let relay = Relay::new(Arc::new(MockProvider::with_texts(["Hi there"])));
//! let mut session = Session::new();
//!
//! let reply = relay.send(&mut session, "Hello").await.unwrap();
//! assert_eq!(reply, "Hi there");
//! assert_eq!(session.len(), 2);
//! # }
//! ```

use std::ops::DerefMut;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::llm::{ChatProvider, Message};
use crate::session::Session;

/// One element of a streamed turn.
///
/// `Failed` is always the last element when present, so a fragment whose
/// text happens to look like an error message is never mistaken for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Non-empty piece of the assistant reply, in emission order.
    Fragment(String),
    /// The turn failed; no assistant message was recorded.
    Failed(ProviderError),
}

/// Lazy, finite, non-restartable sequence of [`StreamItem`]s.
pub type RelayStream<'a> = Pin<Box<dyn Stream<Item = StreamItem> + Send + 'a>>;

/// Translates user submissions into provider calls and records the turns.
#[derive(Clone)]
pub struct Relay {
    provider: Arc<dyn ChatProvider>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("model", &self.provider.model())
            .finish()
    }
}

impl Relay {
    /// Create a relay over an initialised provider capability.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Model identifier of the underlying provider.
    #[must_use]
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Run one complete turn and return the assistant text.
    ///
    /// # Errors
    ///
    /// Returns the provider's [`ProviderError`]; the user message stays in
    /// the history and no assistant message is added.
    pub async fn send(
        &self,
        session: &mut Session,
        user_text: impl Into<String>,
    ) -> Result<String, ProviderError> {
        let request_id = Uuid::new_v4().to_string();
        session.push(Message::user(user_text));

        tracing::debug!(
            request_id = %request_id,
            session_id = %session.id(),
            history_len = session.len(),
            "Sending turn"
        );

        let result = match self.provider.complete(session.history()).await {
            Ok(text) if text.is_empty() => Err(ProviderError::Empty),
            other => other,
        };

        match result {
            Ok(text) => {
                session.push(Message::assistant(text.clone()));
                tracing::info!(
                    name: "relay.turn.completed",
                    request_id = %request_id,
                    session_id = %session.id(),
                    history_len = session.len(),
                    reply_len = text.len(),
                    "Turn completed"
                );
                Ok(text)
            }
            Err(e) => {
                tracing::warn!(
                    name: "relay.turn.failed",
                    request_id = %request_id,
                    session_id = %session.id(),
                    error = %e,
                    code = e.code(),
                    "Turn failed"
                );
                Err(e)
            }
        }
    }

    /// Run one streamed turn.
    ///
    /// The user message is appended immediately. The assistant message is
    /// appended only after the last fragment, when the stream is polled to
    /// its end; dropping the stream earlier leaves it out. Errors never
    /// escape the stream: they arrive as a final [`StreamItem::Failed`].
    ///
    /// `session` can be `&mut Session` or an owned lock guard.
    pub fn send_streaming<'a, S>(&self, mut session: S, user_text: impl Into<String>) -> RelayStream<'a>
    where
        S: DerefMut<Target = Session> + Send + 'a,
    {
        let request_id = Uuid::new_v4().to_string();
        session.push(Message::user(user_text));
        let history = session.history().to_vec();
        let provider = Arc::clone(&self.provider);

        tracing::debug!(
            request_id = %request_id,
            session_id = %session.id(),
            history_len = history.len(),
            "Sending streamed turn"
        );

        Box::pin(async_stream::stream! {
            let mut fragments = match provider.complete_stream(&history).await {
                Ok(s) => s,
                Err(e) => {
                    log_failure(&request_id, session.id(), &e, 0);
                    yield StreamItem::Failed(e);
                    return;
                }
            };

            let mut reply = String::new();
            let mut fragment_count = 0usize;

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        reply.push_str(&text);
                        fragment_count += 1;
                        yield StreamItem::Fragment(text);
                    }
                    Err(e) => {
                        log_failure(&request_id, session.id(), &e, fragment_count);
                        yield StreamItem::Failed(e);
                        return;
                    }
                }
            }

            if reply.is_empty() {
                let e = ProviderError::Empty;
                log_failure(&request_id, session.id(), &e, 0);
                yield StreamItem::Failed(e);
                return;
            }

            let reply_len = reply.len();
            session.push(Message::assistant(reply));
            tracing::info!(
                name: "relay.turn.completed",
                request_id = %request_id,
                session_id = %session.id(),
                history_len = session.len(),
                fragment_count = fragment_count,
                reply_len = reply_len,
                "Streamed turn completed"
            );
        })
    }
}

fn log_failure(request_id: &str, session_id: &str, error: &ProviderError, fragment_count: usize) {
    tracing::warn!(
        name: "relay.turn.failed",
        request_id = %request_id,
        session_id = %session_id,
        error = %error,
        code = error.code(),
        fragment_count = fragment_count,
        "Streamed turn failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockProvider, MockReply};
    use crate::llm::Role;

    fn relay(provider: MockProvider) -> (Relay, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        (Relay::new(Arc::clone(&provider) as Arc<dyn ChatProvider>), provider)
    }

    #[tokio::test]
    async fn test_send_appends_pair() {
        let (relay, _) = relay(MockProvider::with_texts(["Hi there"]));
        let mut session = Session::new();

        let reply = relay.send(&mut session, "Hello").await.unwrap();

        assert_eq!(reply, "Hi there");
        assert_eq!(
            session.history(),
            &[Message::user("Hello"), Message::assistant("Hi there")]
        );
    }

    #[tokio::test]
    async fn test_send_failure_keeps_user_only() {
        let (relay, _) = relay(MockProvider::new([MockReply::Error(ProviderError::Network(
            "connection reset".to_string(),
        ))]));
        let mut session = Session::new();

        let err = relay.send(&mut session, "Hello").await.unwrap_err();

        assert_eq!(err.code(), "network");
        assert_eq!(session.history(), &[Message::user("Hello")]);
    }

    #[tokio::test]
    async fn test_send_resends_full_history() {
        let (relay, provider) = relay(MockProvider::with_texts(["a", "b", "c"]));
        let mut session = Session::new();

        relay.send(&mut session, "1").await.unwrap();
        relay.send(&mut session, "2").await.unwrap();
        relay.send(&mut session, "3").await.unwrap();

        let seen = provider.seen_histories();
        assert_eq!(seen.iter().map(Vec::len).collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(seen[2][4], Message::user("3"));
    }

    #[tokio::test]
    async fn test_streaming_appends_after_drain() {
        let (relay, _) = relay(MockProvider::with_texts(["Hello world"]).chunk_chars(5));
        let mut session = Session::new();

        let items: Vec<StreamItem> = relay.send_streaming(&mut session, "Hi").collect().await;

        assert_eq!(
            items,
            vec![
                StreamItem::Fragment("Hello".to_string()),
                StreamItem::Fragment(" worl".to_string()),
                StreamItem::Fragment("d".to_string()),
            ]
        );
        assert_eq!(session.len(), 2);
        assert_eq!(session.history()[1].text(), "Hello world");
    }

    #[tokio::test]
    async fn test_abandoned_stream_leaves_no_assistant_turn() {
        let (relay, _) = relay(MockProvider::with_texts(["Hello world"]).chunk_chars(2));
        let mut session = Session::new();

        {
            let mut stream = relay.send_streaming(&mut session, "Hi");
            let first = stream.next().await;
            assert_eq!(first, Some(StreamItem::Fragment("He".to_string())));
        }

        assert_eq!(session.history(), &[Message::user("Hi")]);
    }

    #[tokio::test]
    async fn test_streaming_mid_stream_error_is_terminal() {
        let (relay, _) = relay(MockProvider::new([MockReply::Interrupted {
            fragments: vec!["An error occurred: ".to_string(), "just text".to_string()],
            error: ProviderError::Network("stream cut".to_string()),
        }]));
        let mut session = Session::new();

        let items: Vec<StreamItem> = relay.send_streaming(&mut session, "Hi").collect().await;

        // The first fragment only looks like an error.
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], StreamItem::Fragment("An error occurred: ".to_string()));
        assert!(matches!(items[2], StreamItem::Failed(ProviderError::Network(_))));
        assert_eq!(session.len(), 1);
        assert_eq!(session.history()[0].role(), Role::User);
    }

    #[tokio::test]
    async fn test_streaming_empty_reply_fails() {
        let (relay, _) = relay(MockProvider::with_texts([""]));
        let mut session = Session::new();

        let items: Vec<StreamItem> = relay.send_streaming(&mut session, "Hi").collect().await;

        assert_eq!(items, vec![StreamItem::Failed(ProviderError::Empty)]);
        assert_eq!(session.len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_with_owned_guard() {
        let (relay, _) = relay(MockProvider::with_texts(["ok"]));
        let handle = Arc::new(tokio::sync::Mutex::new(Session::new()));

        let guard = Arc::clone(&handle).lock_owned().await;
        let stream = relay.send_streaming(guard, "Hi");
        let handle_task = tokio::spawn(stream.collect::<Vec<_>>());
        let items = handle_task.await.unwrap();

        assert_eq!(items, vec![StreamItem::Fragment("ok".to_string())]);
        assert_eq!(handle.lock().await.len(), 2);
    }
}
