//! Local view of the messaging UI, kept consistent with server events.
//!
//! The server may deliver the same message more than once (an echo to the
//! sending tab plus a history re-fetch after reconnecting), so messages are
//! keyed by id and kept in sequence order.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use athlinked_shared::protocol::{ConversationSummary, MessagePayload, ServerEvent};
use athlinked_shared::ConversationId;

use crate::session::Session;

#[derive(Debug, Default)]
pub struct ConversationView {
    open: Option<ConversationId>,
    messages: Vec<MessagePayload>,
    delivered: HashSet<Uuid>,
    summaries: HashMap<ConversationId, ConversationSummary>,
    total_unread: u32,
    last_error: Option<String>,
    composer: String,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `conversation`, seeding it with history fetched over HTTP.
    pub fn open(&mut self, conversation: ConversationId, history: Vec<MessagePayload>) {
        self.open = Some(conversation);
        self.messages.clear();
        for message in history {
            self.insert_message(message);
        }
    }

    pub fn close(&mut self) {
        self.open = None;
        self.messages.clear();
    }

    /// Seed the conversation list, e.g. from `GET /conversations/{user}`.
    pub fn load_summaries(&mut self, summaries: Vec<ConversationSummary>, total_unread: u32) {
        self.summaries = summaries
            .into_iter()
            .map(|s| (s.conversation_id.clone(), s))
            .collect();
        self.total_unread = total_unread;
    }

    /// Apply one server event. Events are ignored unless `session` has
    /// announced a user. Returns whether anything changed.
    pub fn apply(&mut self, session: &Session, event: ServerEvent) -> bool {
        if !session.is_announced() {
            debug!(event = event.name(), "Ignoring event before announcement");
            return false;
        }

        match event {
            ServerEvent::ReceiveMessage(message) => {
                if self.open.as_ref() != Some(&message.conversation_id) {
                    return false;
                }
                self.insert_message(message)
            }
            ServerEvent::MessageDelivered(receipt) => {
                if let Some(m) = self
                    .messages
                    .iter_mut()
                    .find(|m| m.message_id == receipt.message_id)
                {
                    m.is_delivered = true;
                }
                self.delivered.insert(receipt.message_id)
            }
            ServerEvent::ConversationUpdated(update) => {
                let summary = update.conversation;
                let id = summary.conversation_id.clone();
                self.summaries.insert(id, summary);
                true
            }
            ServerEvent::MessageCountUpdate(badge) => {
                let changed = self.total_unread != badge.count;
                self.total_unread = badge.count;
                changed
            }
            ServerEvent::Error(payload) => {
                self.last_error = Some(payload.message);
                true
            }
        }
    }

    fn insert_message(&mut self, message: MessagePayload) -> bool {
        if message.is_delivered {
            self.delivered.insert(message.message_id);
        }
        if self.messages.iter().any(|m| m.message_id == message.message_id) {
            return false;
        }
        let at = self.messages.partition_point(|m| m.seq <= message.seq);
        self.messages.insert(at, message);
        true
    }

    pub fn open_conversation(&self) -> Option<&ConversationId> {
        self.open.as_ref()
    }

    /// Messages of the open conversation, oldest first.
    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn is_delivered(&self, message_id: &Uuid) -> bool {
        self.delivered.contains(message_id)
    }

    pub fn summary(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries.get(id)
    }

    /// Conversation list, most recently active first.
    pub fn summaries(&self) -> Vec<&ConversationSummary> {
        let mut list: Vec<_> = self.summaries.values().collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }

    pub fn total_unread(&self) -> u32 {
        self.total_unread
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }
}
