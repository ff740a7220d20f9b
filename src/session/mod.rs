//! Session and conversation thread management.
//!
//! A [`Session`] is the ordered, append-only history of one conversation.
//! The web server keeps one per browser in a [`SessionStore`], each behind an
//! async mutex so only one turn runs against it at a time.
//!
//! # Example
//!
//! ```rust
//! use gemini_chatbot::session::{Session, SessionState, SessionStore};
//!
//! let session = Session::new();
//! assert_eq!(session.state(), SessionState::Empty);
//!
//! let store = SessionStore::new();
//! let (id, _handle) = store.create();
//! assert!(store.get(&id).is_some());
//! ```

mod thread;

pub use thread::{Session, SessionHandle, SessionState, SessionStore};
