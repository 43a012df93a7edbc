//! Domain model structs persisted in the messaging database.
//!
//! Every struct derives `Serialize` so it can be returned directly by the
//! HTTP history endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use athlinked_shared::protocol::{MessageContent, MessagePayload, OutgoingMessage};
use athlinked_shared::{ConversationId, MessageType, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A direct conversation between exactly two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Derived from the participant pair, see [`ConversationId::for_pair`].
    pub id: ConversationId,
    /// Lexicographically smaller participant.
    pub participant_a: UserId,
    pub participant_b: UserId,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest message.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn includes(&self, user: &UserId) -> bool {
        &self.participant_a == user || &self.participant_b == user
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted direct message. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    /// Store-assigned position within the conversation, starting at 1.
    pub seq: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub message_type: MessageType,
    pub post_data: Option<Value>,
    /// Store-assigned creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Wire form pushed to participants' connections.
    pub fn to_payload(&self, is_delivered: bool) -> MessagePayload {
        MessagePayload {
            message_id: self.id,
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            message: self.body.clone(),
            media_url: self.media_url.clone(),
            message_type: self.message_type,
            post_data: self.post_data.clone(),
            seq: self.seq,
            created_at: self.created_at,
            is_delivered,
        }
    }
}

// ---------------------------------------------------------------------------
// NewMessage
// ---------------------------------------------------------------------------

/// A validated message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub conversation_id: ConversationId,
    pub content: MessageContent,
}

impl NewMessage {
    pub fn new(sender_id: UserId, outgoing: OutgoingMessage) -> Self {
        Self {
            sender_id,
            receiver_id: outgoing.receiver,
            conversation_id: outgoing.conversation_id,
            content: outgoing.content,
        }
    }
}
