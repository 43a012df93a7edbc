//! # athlinked-store
//!
//! Durable storage for AthLinked direct messages, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for messages,
//! conversations and unread counters. [`SqliteStore`] puts a database
//! behind a mutex and implements the [`MessageStore`] and
//! [`ConversationStore`] collaborator interfaces consumed by the server.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use store::{ConversationStore, MessageStore, MessagingStore, SqliteStore};
