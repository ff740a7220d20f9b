//! HTTP surface driven in-process through `tower::ServiceExt::oneshot`.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use gemini_chatbot::AppState;
use gemini_chatbot::config::AppConfig;
use gemini_chatbot::error::ProviderError;
use gemini_chatbot::llm::mock::{MockProvider, MockReply};
use gemini_chatbot::relay::Relay;
use gemini_chatbot::server::router;
use gemini_chatbot::session::SessionStore;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(provider: MockProvider) -> (Router, SessionStore) {
    let config = AppConfig::load_from_args(["gemini-chatbot"]).expect("defaults should load");
    let state = AppState::new(Relay::new(Arc::new(provider)), Arc::new(config));
    let sessions = state.sessions.clone();
    (router(state), sessions)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Event names of an SSE body, in order.
fn event_names(body: &str) -> Vec<&str> {
    body.lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect()
}

/// JSON payloads of an SSE body, in order.
fn event_data(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect()
}

#[tokio::test]
async fn test_index_page() {
    let (app, _) = app(MockProvider::with_texts(["unused"]));
    let (status, body) = send(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Gemini AI Chatbot"));
    assert!(body.contains("Type your message here..."));
}

#[tokio::test]
async fn test_healthz_reports_model() {
    let (app, _) = app(MockProvider::with_texts(["unused"]));
    let (status, body) = send(&app, get("/healthz")).await;

    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["model"], "mock-model");
}

#[tokio::test]
async fn test_chat_round_trip_and_history() {
    let (app, _) = app(MockProvider::with_texts(["Hi there", "Good!"]));

    let (status, body) = send(&app, post_json("/api/chat", &json!({ "message": "Hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["reply"], "Hi there");
    let session_id = v["session_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        post_json(
            "/api/chat",
            &json!({ "session_id": session_id, "message": "How are you?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get(&format!("/api/sessions/{session_id}/messages"))).await;
    assert_eq!(status, StatusCode::OK);
    let history: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        history,
        json!([
            { "role": "user", "text": "Hello" },
            { "role": "assistant", "text": "Hi there" },
            { "role": "user", "text": "How are you?" },
            { "role": "assistant", "text": "Good!" },
        ])
    );

    let (_, body) = send(&app, get(&format!("/api/sessions/{session_id}"))).await;
    let info: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(info["message_count"], 4);
    assert_eq!(info["state"], "active");
    let created = chrono::DateTime::parse_from_rfc3339(info["created_at"].as_str().unwrap()).unwrap();
    let last = chrono::DateTime::parse_from_rfc3339(info["last_activity"].as_str().unwrap()).unwrap();
    assert!(last >= created);
}

#[tokio::test]
async fn test_blank_message_rejected() {
    let (app, sessions) = app(MockProvider::with_texts(["unused"]));
    let (status, _) = send(&app, post_json("/api/chat", &json!({ "message": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_provider_error_is_bad_gateway() {
    let (app, sessions) = app(MockProvider::new([MockReply::Error(ProviderError::Auth {
        status: 403,
        message: "API key invalid".to_string(),
    })]));

    let (status, body) = send(&app, post_json("/api/chat", &json!({ "message": "Hello" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("API key invalid"));

    // The user message stays; nothing else was recorded.
    let id = sessions.list_ids().pop().unwrap();
    assert_eq!(sessions.get(&id).unwrap().lock().await.len(), 1);
}

#[tokio::test]
async fn test_busy_session_conflict() {
    let (app, sessions) = app(MockProvider::with_texts(["unused"]));
    let (id, handle) = sessions.create();
    let _turn = handle.lock().await;

    let (status, _) = send(
        &app,
        post_json("/api/chat", &json!({ "session_id": id, "message": "Hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, get(&format!("/api/chat/stream?session_id={id}&message=Hi"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event_names(&body), vec!["error", "done"]);
    assert_eq!(event_data(&body)[0]["data"]["code"], "busy");
}

#[tokio::test]
async fn test_reads_do_not_wait_for_running_turn() {
    let (app, sessions) = app(MockProvider::with_texts(["unused"]));
    let (id, handle) = sessions.create();
    let turn = handle.lock().await;

    let (status, _) = tokio::time::timeout(
        Duration::from_secs(2),
        send(&app, get(&format!("/api/sessions/{id}/messages"))),
    )
    .await
    .expect("history read should not block");
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = tokio::time::timeout(
        Duration::from_secs(2),
        send(&app, get(&format!("/api/sessions/{id}"))),
    )
    .await
    .expect("session read should not block");
    assert_eq!(status, StatusCode::CONFLICT);

    // Still there once the turn is over.
    drop(turn);
    let (status, _) = send(&app, get(&format!("/api/sessions/{id}/messages"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stream_events() {
    let (app, sessions) = app(MockProvider::with_texts(["Hello world"]).chunk_chars(5));

    let (status, body) = send(&app, get("/api/chat/stream?message=Hi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        event_names(&body),
        vec![
            "stream.start",
            "message.delta",
            "message.delta",
            "message.delta",
            "done"
        ]
    );

    let data = event_data(&body);
    let session_id = data[0]["data"]["session_id"].as_str().unwrap();
    let text: String = data[1..4]
        .iter()
        .map(|d| d["data"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, "Hello world");

    let handle = sessions.get(session_id).unwrap();
    assert_eq!(handle.lock().await.len(), 2);
}

#[tokio::test]
async fn test_stream_failure_then_done() {
    let (app, sessions) = app(MockProvider::new([MockReply::Interrupted {
        fragments: vec!["An error occurred: not really".to_string()],
        error: ProviderError::Quota {
            message: "slow down".to_string(),
        },
    }]));

    let (_, body) = send(&app, get("/api/chat/stream?message=Hi")).await;
    assert_eq!(
        event_names(&body),
        vec!["stream.start", "message.delta", "error", "done"]
    );

    let data = event_data(&body);
    assert_eq!(data[1]["data"]["text"], "An error occurred: not really");
    assert_eq!(data[2]["data"]["code"], "quota");

    let id = data[0]["data"]["session_id"].as_str().unwrap();
    assert_eq!(sessions.get(id).unwrap().lock().await.len(), 1);
}

#[tokio::test]
async fn test_new_chat_replaces_session() {
    let (app, sessions) = app(MockProvider::with_texts(["Hi there"]));

    let (_, body) = send(&app, post_json("/api/chat", &json!({ "message": "Hello" }))).await;
    let old_id = serde_json::from_str::<Value>(&body).unwrap()["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = send(
        &app,
        post_json("/api/sessions", &json!({ "replaces": old_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let created: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(created["message_count"], 0);
    assert_eq!(created["state"], "empty");
    assert!(created["created_at"].is_string());
    assert_ne!(created["id"], old_id.as_str());

    let (status, _) = send(&app, get(&format!("/api/sessions/{old_id}/messages"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_create_session_without_body() {
    let (app, sessions) = app(MockProvider::with_texts(["unused"]));
    let req = Request::builder()
        .method("POST")
        .uri("/api/sessions")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_delete_session() {
    let (app, sessions) = app(MockProvider::with_texts(["unused"]));
    let (id, _) = sessions.create();

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let (app, _) = app(MockProvider::with_texts(["unused"]));
    let message = "x".repeat(70 * 1024);

    let (status, _) = send(&app, post_json("/api/chat", &json!({ "message": message }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
