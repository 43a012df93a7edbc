//! Collaborator interfaces consumed by the messaging server, and their
//! SQLite implementation.
//!
//! The traits are synchronous, like [`Database`] itself. Async callers are
//! expected to run them on a blocking pool.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use athlinked_shared::protocol::ConversationSummary;
use athlinked_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Conversation, Message, NewMessage};

/// Durable message log.
pub trait MessageStore: Send + Sync {
    /// Persist a message. Conversation creation, sequence assignment, the
    /// message append and the receiver's unread increment are one atomic
    /// unit: either all are visible afterwards or none is.
    fn send_message(&self, message: NewMessage) -> Result<Message>;

    /// Page through a conversation, newest first.
    fn messages_in(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        before_seq: Option<i64>,
    ) -> Result<Vec<Message>>;
}

/// Conversation metadata and unread counters.
pub trait ConversationStore: Send + Sync {
    fn conversation(&self, id: &ConversationId) -> Result<Conversation>;

    /// Every conversation of `user`, most recently active first.
    fn conversations_for(&self, user: &UserId) -> Result<Vec<ConversationSummary>>;

    fn total_unread(&self, user: &UserId) -> Result<u32>;

    /// Reset `user`'s counter for one conversation; returns the cleared count.
    fn mark_read(&self, user: &UserId, conversation_id: &ConversationId) -> Result<u32>;
}

/// Both interfaces, as one object-safe bound for `Arc<dyn MessagingStore>`.
pub trait MessagingStore: MessageStore + ConversationStore {}

impl<T: MessageStore + ConversationStore> MessagingStore for T {}

/// [`Database`] behind a mutex. Every write is a single SQLite transaction
/// taken under the lock, so concurrent sends to the same conversation
/// serialize and no counter update is lost.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl MessageStore for SqliteStore {
    fn send_message(&self, message: NewMessage) -> Result<Message> {
        self.lock()?.insert_message(&message)
    }

    fn messages_in(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        before_seq: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.lock()?
            .get_messages_for_conversation(conversation_id, limit, before_seq)
    }
}

impl ConversationStore for SqliteStore {
    fn conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.lock()?.get_conversation(id)
    }

    fn conversations_for(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        self.lock()?.list_conversation_summaries(user)
    }

    fn total_unread(&self, user: &UserId) -> Result<u32> {
        self.lock()?.total_unread(user)
    }

    fn mark_read(&self, user: &UserId, conversation_id: &ConversationId) -> Result<u32> {
        self.lock()?.mark_conversation_read(user, conversation_id)
    }
}
