//! Helpers shared by the server's unit tests.

use tokio::sync::mpsc;

use athlinked_shared::protocol::{ConversationSummary, MessageContent, ServerEvent};
use athlinked_shared::{ConnectionId, ConversationId, UserId};
use athlinked_store::{
    Conversation, ConversationStore, Message, MessageStore, NewMessage, StoreError,
};

use crate::registry::ConnectionRegistry;

/// A store whose every call fails, as if the database were unreachable.
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::InvalidData("database unavailable".into())
}

impl MessageStore for FailingStore {
    fn send_message(&self, _message: NewMessage) -> Result<Message, StoreError> {
        Err(unavailable())
    }

    fn messages_in(
        &self,
        _conversation_id: &ConversationId,
        _limit: u32,
        _before_seq: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        Err(unavailable())
    }
}

impl ConversationStore for FailingStore {
    fn conversation(&self, _id: &ConversationId) -> Result<Conversation, StoreError> {
        Err(unavailable())
    }

    fn conversations_for(&self, _user: &UserId) -> Result<Vec<ConversationSummary>, StoreError> {
        Err(unavailable())
    }

    fn total_unread(&self, _user: &UserId) -> Result<u32, StoreError> {
        Err(unavailable())
    }

    fn mark_read(&self, _user: &UserId, _conversation_id: &ConversationId) -> Result<u32, StoreError> {
        Err(unavailable())
    }
}

pub fn text_message(from: &str, to: &str, body: &str) -> NewMessage {
    let sender = UserId::new(from);
    let receiver = UserId::new(to);
    NewMessage {
        conversation_id: ConversationId::for_pair(&sender, &receiver),
        sender_id: sender,
        receiver_id: receiver,
        content: MessageContent::Text { body: body.into() },
    }
}

/// Register a connection and bind it to `user`.
pub async fn bound_connection(
    registry: &ConnectionRegistry,
    user: &UserId,
) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let id = registry.register(tx).await;
    registry.bind(id, user.clone()).await.unwrap();
    (id, rx)
}

/// Everything queued on an outbox so far.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
