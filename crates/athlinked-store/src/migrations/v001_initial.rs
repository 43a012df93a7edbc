//! v001 -- Initial schema creation.
//!
//! Creates the three messaging tables: `conversations`, `messages` and
//! `unread_counters`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (one per unordered participant pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,   -- derived from the participant pair
    participant_a TEXT NOT NULL,               -- lexicographically smaller user id
    participant_b TEXT NOT NULL,
    created_at    TEXT NOT NULL,               -- RFC-3339, microseconds, UTC
    updated_at    TEXT NOT NULL,

    UNIQUE (participant_a, participant_b),
    CHECK (participant_a < participant_b)
);

CREATE INDEX IF NOT EXISTS idx_conversations_a ON conversations(participant_a);
CREATE INDEX IF NOT EXISTS idx_conversations_b ON conversations(participant_b);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    seq             INTEGER NOT NULL,           -- position within the conversation
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    body            TEXT,
    media_url       TEXT,
    message_type    TEXT NOT NULL,              -- text | media | post_share
    post_data       TEXT,                       -- JSON object
    created_at      TEXT NOT NULL,

    CHECK (body IS NOT NULL OR media_url IS NOT NULL OR post_data IS NOT NULL),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Unread counters, per (user, conversation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS unread_counters (
    user_id         TEXT NOT NULL,
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    count           INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),

    PRIMARY KEY (user_id, conversation_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
