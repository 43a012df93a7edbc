//! Message persistence.
//!
//! [`Database::insert_message`] is the only write path: it creates the
//! conversation on first contact, assigns the next sequence number and the
//! creation timestamp, appends the message and bumps the receiver's unread
//! counter inside one transaction.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use athlinked_shared::types::ordered_pair;
use athlinked_shared::{ConversationId, MessageType, UserId};

use crate::database::{timestamp_from_sql, timestamp_to_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};

const MESSAGE_COLUMNS: &str = "id, conversation_id, seq, sender_id, receiver_id, body, \
                               media_url, message_type, post_data, created_at";

impl Database {
    pub fn insert_message(&mut self, new: &NewMessage) -> Result<Message> {
        if new.sender_id == new.receiver_id {
            return Err(StoreError::InvalidData(
                "sender and receiver must differ".to_string(),
            ));
        }

        let expected = ConversationId::for_pair(&new.sender_id, &new.receiver_id);
        if expected != new.conversation_id {
            return Err(StoreError::InvalidData(format!(
                "conversation id {} does not belong to the participants",
                new.conversation_id
            )));
        }

        let (participant_a, participant_b) = ordered_pair(&new.sender_id, &new.receiver_id);
        let now = Utc::now();
        let now_sql = timestamp_to_sql(&now);
        let post_data = new
            .content
            .post_data()
            .map(|v| serde_json::to_string(&v))
            .transpose()?;

        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO conversations (id, participant_a, participant_b, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![
                new.conversation_id.as_str(),
                participant_a.as_str(),
                participant_b.as_str(),
                now_sql,
            ],
        )?;

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![new.conversation_id.as_str()],
            |row| row.get(0),
        )?;

        let id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, seq, sender_id, receiver_id, body,
                                   media_url, message_type, post_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.to_string(),
                new.conversation_id.as_str(),
                seq,
                new.sender_id.as_str(),
                new.receiver_id.as_str(),
                new.content.body(),
                new.content.media_url(),
                new.content.message_type().as_str(),
                post_data,
                now_sql,
            ],
        )?;

        tx.execute(
            "INSERT INTO unread_counters (user_id, conversation_id, count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(user_id, conversation_id) DO UPDATE SET count = count + 1",
            params![new.receiver_id.as_str(), new.conversation_id.as_str()],
        )?;

        // The sender gets a zero row so both sides list the conversation.
        tx.execute(
            "INSERT OR IGNORE INTO unread_counters (user_id, conversation_id, count)
             VALUES (?1, ?2, 0)",
            params![new.sender_id.as_str(), new.conversation_id.as_str()],
        )?;

        tx.commit()?;

        tracing::debug!(
            message_id = %id,
            conversation = %new.conversation_id,
            seq,
            "message stored"
        );

        Ok(Message {
            id,
            conversation_id: new.conversation_id.clone(),
            seq,
            sender_id: new.sender_id.clone(),
            receiver_id: new.receiver_id.clone(),
            body: new.content.body().map(str::to_string),
            media_url: new.content.media_url().map(str::to_string),
            message_type: new.content.message_type(),
            post_data: new.content.post_data(),
            created_at: timestamp_from_sql(9, &now_sql)?,
        })
    }

    /// Page through a conversation, newest first.
    ///
    /// `before_seq` excludes messages at or after that position, so the
    /// smallest `seq` of one page is the cursor for the next.
    pub fn get_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        before_seq: Option<i64>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1 AND seq < ?2
             ORDER BY seq DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![
                conversation_id.as_str(),
                before_seq.unwrap_or(i64::MAX),
                limit
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let seq: i64 = row.get(2)?;
    let sender_id: String = row.get(3)?;
    let receiver_id: String = row.get(4)?;
    let body: Option<String> = row.get(5)?;
    let media_url: Option<String> = row.get(6)?;
    let type_str: String = row.get(7)?;
    let post_json: Option<String> = row.get(8)?;
    let ts_str: String = row.get(9)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let message_type: MessageType = type_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let post_data = post_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        conversation_id: ConversationId(conversation_id),
        seq,
        sender_id: UserId(sender_id),
        receiver_id: UserId(receiver_id),
        body,
        media_url,
        message_type,
        post_data,
        created_at: timestamp_from_sql(9, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use athlinked_shared::protocol::MessageContent;
    use serde_json::json;

    fn text(from: &str, to: &str, body: &str) -> NewMessage {
        let sender = UserId::new(from);
        let receiver = UserId::new(to);
        NewMessage {
            conversation_id: ConversationId::for_pair(&sender, &receiver),
            sender_id: sender,
            receiver_id: receiver,
            content: MessageContent::Text { body: body.into() },
        }
    }

    #[test]
    fn insert_assigns_increasing_seq() {
        let mut db = Database::open_in_memory().unwrap();
        let first = db.insert_message(&text("a", "b", "one")).unwrap();
        let second = db.insert_message(&text("b", "a", "two")).unwrap();

        assert_eq!(first.conversation_id, second.conversation_id);
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(second.created_at >= first.created_at);
    }

    #[test]
    fn insert_round_trips_through_history() {
        let mut db = Database::open_in_memory().unwrap();
        let sender = UserId::new("club-1");
        let receiver = UserId::new("parent-2");
        let new = NewMessage {
            conversation_id: ConversationId::for_pair(&sender, &receiver),
            sender_id: sender,
            receiver_id: receiver,
            content: MessageContent::PostShare {
                post: json!({"post_id": "p1"}).as_object().unwrap().clone(),
                caption: Some("look".into()),
            },
        };

        let stored = db.insert_message(&new).unwrap();
        let loaded = db
            .get_messages_for_conversation(&stored.conversation_id, 1, None)
            .unwrap()
            .remove(0);
        assert_eq!(stored, loaded);
        assert_eq!(loaded.message_type, MessageType::PostShare);
        assert_eq!(loaded.post_data.unwrap()["post_id"], "p1");
    }

    #[test]
    fn insert_rejects_mismatched_conversation() {
        let mut db = Database::open_in_memory().unwrap();
        let mut new = text("a", "b", "hi");
        new.conversation_id = ConversationId::for_pair(&UserId::new("a"), &UserId::new("c"));
        assert!(matches!(
            db.insert_message(&new),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn paging_walks_backwards() {
        let mut db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            db.insert_message(&text("a", "b", &format!("m{i}"))).unwrap();
        }
        let conv = ConversationId::for_pair(&UserId::new("a"), &UserId::new("b"));

        let page = db.get_messages_for_conversation(&conv, 2, None).unwrap();
        assert_eq!(page.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![5, 4]);

        let next = db
            .get_messages_for_conversation(&conv, 10, Some(page[1].seq))
            .unwrap();
        assert_eq!(next.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert!(db
            .get_messages_for_conversation(&conv, 10, Some(1))
            .unwrap()
            .is_empty());
    }
}
