use futures::StreamExt;
use gemini_chatbot::error::ProviderError;
use gemini_chatbot::llm::mock::{MockProvider, MockReply};
use gemini_chatbot::llm::{ChatProvider, Message, Role};
use gemini_chatbot::relay::{Relay, StreamItem};
use gemini_chatbot::session::{Session, SessionState, SessionStore};
use std::sync::Arc;

fn relay_with(provider: MockProvider) -> (Relay, Arc<MockProvider>) {
    let provider = Arc::new(provider);
    (
        Relay::new(Arc::clone(&provider) as Arc<dyn ChatProvider>),
        provider,
    )
}

fn collect_text(items: Vec<StreamItem>) -> Result<String, ProviderError> {
    let mut text = String::new();
    for item in items {
        match item {
            StreamItem::Fragment(t) => text.push_str(&t),
            StreamItem::Failed(e) => return Err(e),
        }
    }
    Ok(text)
}

#[tokio::test]
async fn test_two_turn_conversation() {
    let (relay, provider) = relay_with(MockProvider::with_texts(["Hi there", "Good!"]));
    let mut session = Session::new();

    assert_eq!(relay.send(&mut session, "Hello").await.unwrap(), "Hi there");
    assert_eq!(
        relay.send(&mut session, "How are you?").await.unwrap(),
        "Good!"
    );

    assert_eq!(
        session.history(),
        &[
            Message::user("Hello"),
            Message::assistant("Hi there"),
            Message::user("How are you?"),
            Message::assistant("Good!"),
        ]
    );
    assert_eq!(session.state(), SessionState::Active);

    // The second request carried the whole conversation so far.
    let seen = provider.seen_histories();
    assert_eq!(seen[1].len(), 3);
    assert_eq!(seen[1][1], Message::assistant("Hi there"));
}

#[tokio::test]
async fn test_n_turns_alternate_roles() {
    let (relay, _) = relay_with(MockProvider::repeating(MockReply::Text("ok".to_string())));
    let mut session = Session::new();

    for n in 0..5 {
        relay.send(&mut session, format!("turn {n}")).await.unwrap();
    }

    assert_eq!(session.len(), 10);
    for (i, message) in session.history().iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(message.role(), expected);
    }
}

#[tokio::test]
async fn test_streaming_matches_complete() {
    let reply = "The quick brown fox jumps over the lazy dog";
    let (relay, _) = relay_with(
        MockProvider::repeating(MockReply::Text(reply.to_string())).chunk_chars(7),
    );

    let mut a = Session::new();
    let mut b = Session::new();
    relay.send(&mut a, "Hello").await.unwrap();
    relay.send(&mut a, "More").await.unwrap();

    relay
        .send_streaming(&mut b, "Hello")
        .collect::<Vec<_>>()
        .await;
    let items: Vec<StreamItem> = relay.send_streaming(&mut b, "More").collect().await;

    assert!(items.len() > 1);
    assert_eq!(collect_text(items).unwrap(), reply);
    assert_eq!(a.history(), b.history());
}

#[tokio::test]
async fn test_failure_grows_history_by_one() {
    let (relay, _) = relay_with(MockProvider::new([
        MockReply::Text("Hi there".to_string()),
        MockReply::Error(ProviderError::Http {
            status: 500,
            message: "internal".to_string(),
        }),
        MockReply::Interrupted {
            fragments: vec!["Par".to_string()],
            error: ProviderError::Network("reset".to_string()),
        },
        MockReply::Text("Back".to_string()),
    ]));
    let mut session = Session::new();

    relay.send(&mut session, "Hello").await.unwrap();
    assert_eq!(session.len(), 2);

    let err = relay.send(&mut session, "Again").await.unwrap_err();
    assert_eq!(err.code(), "http");
    assert_eq!(session.len(), 3);

    let items: Vec<StreamItem> = relay.send_streaming(&mut session, "Stream").collect().await;
    assert!(matches!(
        collect_text(items),
        Err(ProviderError::Network(_))
    ));
    assert_eq!(session.len(), 4);

    // Still usable afterwards.
    assert_eq!(relay.send(&mut session, "Last").await.unwrap(), "Back");
    assert_eq!(session.len(), 6);
    assert_eq!(session.history()[5], Message::assistant("Back"));
}

#[tokio::test]
async fn test_replacing_session_starts_empty() {
    let (relay, _) = relay_with(MockProvider::with_texts(["Hi there", "Fresh"]));
    let store = SessionStore::new();

    let (old_id, old) = store.create();
    relay
        .send(&mut *old.lock().await, "Hello")
        .await
        .unwrap();

    let (new_id, new) = store.replace(Some(&old_id));
    assert!(store.get(&old_id).is_none());
    assert_eq!(new.lock().await.state(), SessionState::Empty);

    let mut guard = new.lock().await;
    relay.send(&mut guard, "Start over").await.unwrap();
    assert_eq!(
        guard.history(),
        &[Message::user("Start over"), Message::assistant("Fresh")]
    );
    assert_ne!(old_id, new_id);
}
