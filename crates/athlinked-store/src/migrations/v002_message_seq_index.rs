use rusqlite::Connection;

// Enforces one message per (conversation, seq) and serves history paging.
const UP_SQL: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
