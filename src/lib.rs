//! Gemini chat relay
//!
//! A small chatbot that keeps one conversation history per user and relays
//! every new message, together with the full history, to Google's Gemini
//! `generateContent` API.
//!
//! # Architecture
//!
//! - **Session Holder**: append-only conversation history ([`session`])
//! - **Relay**: turns a submission into a provider call and records the result ([`relay`])
//! - **Provider**: Gemini REST client behind the [`llm::ChatProvider`] trait ([`llm`])
//! - **Server**: Axum HTTP server with SSE streaming and a single-page UI ([`server`], [`ui`])
//! - **REPL**: terminal chat loop ([`repl`])
//!
//! # Modules
//!
//! - [`config`]: Layered configuration and CLI
//! - [`error`]: Configuration and provider errors
//! - [`normalized`]: Streaming event model sent to the browser
//! - [`telemetry`]: Logging setup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod llm;
pub mod normalized;
pub mod relay;
pub mod repl;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod ui;

use crate::config::AppConfig;

use relay::Relay;
use session::SessionStore;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Relay to the configured provider.
    pub relay: Relay,
    /// Session store, one entry per browser.
    pub sessions: SessionStore,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build state with an empty session store.
    #[must_use]
    pub fn new(relay: Relay, config: Arc<AppConfig>) -> Self {
        Self {
            relay,
            sessions: SessionStore::new(),
            config,
        }
    }
}
