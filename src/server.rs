use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::llm::Message;
use crate::normalized::{ChatEvent, sse_event};
use crate::relay::Relay;
use crate::session::{Session, SessionHandle, SessionState, SessionStore};
use crate::ui;

/// Largest accepted request body.
pub const BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, relay: Relay) -> anyhow::Result<()> {
    let state = AppState::new(relay, Arc::clone(&config));

    let sweeper = spawn_session_sweeper(
        state.sessions.clone(),
        config.session.idle_timeout(),
        config.session.sweep_interval(),
    );

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server shut down");
    Ok(())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // A disabled timeout is a very long one so the layer stack keeps one type.
    let timeout_duration = if state.config.server.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60)
    } else {
        Duration::from_secs(state.config.server.request_timeout_secs)
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        .route("/api/sessions", post(api_create_session))
        .route(
            "/api/sessions/{id}",
            get(api_get_session).delete(api_delete_session),
        )
        .route("/api/sessions/{id}/messages", get(api_get_messages))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drop sessions idle longer than `idle_timeout`.
pub fn spawn_session_sweeper(
    sessions: SessionStore,
    idle_timeout: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired_with_timeout(idle_timeout);
            if removed > 0 {
                tracing::debug!(removed, remaining = sessions.len(), "Swept idle sessions");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Index page handler.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(ui::chat_page(state.relay.model()))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    model: String,
}

/// GET /healthz - Liveness probe.
async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        model: state.relay.model().to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (creates new if not provided).
    #[serde(default)]
    session_id: Option<String>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Session ID for this conversation.
    session_id: String,
    /// Complete assistant reply.
    reply: String,
}

/// Query parameters for stream endpoint.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

/// Request body for session creation.
#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    /// Session discarded by a "New chat" action.
    #[serde(default)]
    replaces: Option<String>,
}

/// Session info for API responses.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    message_count: usize,
    state: SessionState,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            message_count: session.len(),
            state: session.state(),
            created_at: session.created_at(),
            last_activity: session.last_activity(),
        }
    }
}

/// Message DTO for API responses.
#[derive(Debug, Serialize)]
struct MessageDto {
    role: &'static str,
    text: String,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role().as_str(),
            text: m.text().to_string(),
        }
    }
}

/// Resolve the session for a turn: the given one (created if unknown), or a
/// fresh one.
fn resolve_session(sessions: &SessionStore, id: Option<&str>) -> (String, SessionHandle) {
    match id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => (id.to_string(), sessions.get_or_create(id)),
        None => sessions.create(),
    }
}

/// Take the turn for a session, or report that one is already running.
fn claim_turn(
    session_id: &str,
    handle: SessionHandle,
) -> Result<OwnedMutexGuard<Session>, (StatusCode, String)> {
    match handle.try_lock_owned() {
        Ok(guard) => Ok(guard),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Turn rejected, session busy");
            Err((
                StatusCode::CONFLICT,
                "A reply is still in progress for this session".to_string(),
            ))
        }
    }
}

/// Read access to a session that does not wait behind a running turn.
fn read_session(
    sessions: &SessionStore,
    id: &str,
) -> Result<OwnedMutexGuard<Session>, StatusCode> {
    let handle = sessions.get(id).ok_or(StatusCode::NOT_FOUND)?;
    handle.try_lock_owned().map_err(|e| {
        tracing::debug!(session_id = %id, error = %e, "Session read while a turn is running");
        StatusCode::CONFLICT
    })
}

fn validate_message(message: &str) -> Result<(), (StatusCode, String)> {
    if message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Message cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/chat - Run one complete turn.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    tracing::info!(
        session_id = ?req.session_id,
        message_length = req.message.len(),
        "Received chat request"
    );

    validate_message(&req.message)?;

    let (session_id, handle) = resolve_session(&state.sessions, req.session_id.as_deref());
    let mut session = claim_turn(&session_id, handle)?;

    match state.relay.send(&mut session, req.message).await {
        Ok(reply) => Ok(Json(ChatResponse { session_id, reply })),
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

/// GET /api/chat/stream - SSE stream for one turn.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if let Err((_, message)) = validate_message(&query.message) {
        return single_error_sse(&message, "invalid");
    }

    let (session_id, handle) = resolve_session(&state.sessions, query.session_id.as_deref());
    let Ok(guard) = claim_turn(&session_id, handle) else {
        return single_error_sse("A reply is still in progress for this session", "busy");
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        session_id = %session_id,
        request_id = %request_id,
        "Starting SSE stream"
    );

    let mut items = state.relay.send_streaming(guard, query.message);

    let sse_stream = async_stream::stream! {
        let start = ChatEvent::StreamStart {
            request_id,
            session_id,
        };
        yield Ok::<String, std::convert::Infallible>(sse_event(&start));

        while let Some(item) = items.next().await {
            yield Ok(sse_event(&ChatEvent::from(item)));
        }

        yield Ok(sse_event(&ChatEvent::Done));
    };

    build_sse_response(Body::from_stream(sse_stream))
}

/// POST /api/sessions - Create a new session, optionally replacing one.
async fn api_create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SessionInfo>, (StatusCode, String)> {
    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    };

    let (_id, handle) = state.sessions.replace(req.replaces.as_deref());
    let session = handle.lock().await;
    Ok(Json(SessionInfo::from(&*session)))
}

/// GET /api/sessions/:id - Get session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    let session = read_session(&state.sessions, &id)?;
    Ok(Json(SessionInfo::from(&*session)))
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// GET /api/sessions/:id/messages - Get session messages.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageDto>>, StatusCode> {
    let session = read_session(&state.sessions, &id)?;
    Ok(Json(session.history().iter().map(MessageDto::from).collect()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn single_error_sse(message: &str, code: &str) -> Response {
    let err = ChatEvent::Error {
        message: message.to_string(),
        code: Some(code.to_string()),
    };

    let payload = format!("{}{}", sse_event(&err), sse_event(&ChatEvent::Done));
    build_sse_response(Body::from(payload))
}

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}
