//! Server-rendered chat page.
//!
//! The page is a single HTML document with inline CSS and script; there are
//! no static assets to serve. The script talks to the JSON and SSE endpoints
//! in [`crate::server`].

mod page;

pub use page::chat_page;
