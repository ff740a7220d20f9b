//! Streaming event types sent to the browser.
//!
//! A streamed turn is delivered as Server-Sent Events:
//! - `stream.start` once, with the request and session IDs
//! - `message.delta` for each fragment of the reply
//! - `error` at most once, when the turn failed
//! - `done` always last
//!
//! # Example
//!
//! ```rust
//! use gemini_chatbot::normalized::{ChatEvent, sse_event};
//!
//! let event = ChatEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.contains("message.delta"));
//! ```

use serde::{Deserialize, Serialize};

use crate::relay::StreamItem;

/// Events emitted on the chat SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// A streamed turn has started.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
        /// Session the turn belongs to.
        session_id: String,
    },

    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    /// The turn failed.
    #[serde(rename = "error")]
    Error {
        /// Human-readable description.
        message: String,
        /// Optional error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream has completed.
    #[serde(rename = "done")]
    Done,
}

impl From<StreamItem> for ChatEvent {
    fn from(item: StreamItem) -> Self {
        match item {
            StreamItem::Fragment(text) => Self::MessageDelta { text },
            StreamItem::Failed(e) => Self::Error {
                message: e.to_string(),
                code: Some(e.code().to_string()),
            },
        }
    }
}

/// Convert a [`ChatEvent`] to an SSE-formatted string.
///
/// The output carries both an `event:` line (for `EventSource` listeners)
/// and a `data:` line containing the JSON payload.
pub fn sse_event(evt: &ChatEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    let event_name = event_name(evt);

    format!("event: {event_name}\ndata: {json}\n\n")
}

/// Get the SSE event name for a [`ChatEvent`].
pub fn event_name(evt: &ChatEvent) -> &'static str {
    match evt {
        ChatEvent::StreamStart { .. } => "stream.start",
        ChatEvent::MessageDelta { .. } => "message.delta",
        ChatEvent::Error { .. } => "error",
        ChatEvent::Done => "done",
    }
}
