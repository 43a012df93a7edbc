//! Conversation lookups and unread counters.

use rusqlite::{params, OptionalExtension};

use athlinked_shared::protocol::{preview_text, ConversationSummary};
use athlinked_shared::{ConversationId, MessageType, UserId};

use crate::database::{timestamp_from_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::Conversation;

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, participant_a, participant_b, created_at, updated_at
                 FROM conversations
                 WHERE id = ?1",
                params![id.as_str()],
                row_to_conversation,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// Summaries of every conversation `user` takes part in, most recently
    /// active first.
    pub fn list_conversation_summaries(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id,
                    CASE WHEN c.participant_a = ?1 THEN c.participant_b ELSE c.participant_a END,
                    m.body,
                    m.message_type,
                    m.sender_id,
                    m.created_at,
                    COALESCE(u.count, 0)
             FROM conversations c
             JOIN messages m
               ON m.conversation_id = c.id
              AND m.seq = (SELECT MAX(seq) FROM messages WHERE conversation_id = c.id)
             LEFT JOIN unread_counters u
               ON u.conversation_id = c.id AND u.user_id = ?1
             WHERE c.participant_a = ?1 OR c.participant_b = ?1
             ORDER BY m.created_at DESC, m.rowid DESC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], row_to_summary)?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Sum of every unread counter of `user`, computed by aggregate query.
    pub fn total_unread(&self, user: &UserId) -> Result<u32> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(count), 0) FROM unread_counters WHERE user_id = ?1",
            params![user.as_str()],
            |row| row.get(0),
        )?;
        Ok(total as u32)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Reset `user`'s unread counter for a conversation. Returns the count
    /// that was cleared.
    pub fn mark_conversation_read(
        &mut self,
        user: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<u32> {
        let tx = self.conn_mut().transaction()?;

        let previous: Option<i64> = tx
            .query_row(
                "SELECT count FROM unread_counters WHERE user_id = ?1 AND conversation_id = ?2",
                params![user.as_str(), conversation_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if previous.unwrap_or(0) > 0 {
            tx.execute(
                "UPDATE unread_counters SET count = 0 WHERE user_id = ?1 AND conversation_id = ?2",
                params![user.as_str(), conversation_id.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(previous.unwrap_or(0) as u32)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let participant_a: String = row.get(1)?;
    let participant_b: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;

    Ok(Conversation {
        id: ConversationId(id),
        participant_a: UserId(participant_a),
        participant_b: UserId(participant_b),
        created_at: timestamp_from_sql(3, &created_str)?,
        updated_at: timestamp_from_sql(4, &updated_str)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationSummary> {
    let id: String = row.get(0)?;
    let other: String = row.get(1)?;
    let body: Option<String> = row.get(2)?;
    let type_str: String = row.get(3)?;
    let sender: String = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let unread: i64 = row.get(6)?;

    let message_type: MessageType = type_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ConversationSummary {
        conversation_id: ConversationId(id),
        other_user_id: UserId(other),
        last_message: preview_text(body.as_deref(), message_type),
        last_message_type: message_type,
        last_sender_id: UserId(sender),
        last_message_at: timestamp_from_sql(5, &ts_str)?,
        unread_count: unread.max(0) as u32,
    })
}
