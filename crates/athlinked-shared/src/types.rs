use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CONVERSATION_ID_HEX_LEN, KDF_CONTEXT_CONVERSATION_ID};
use crate::error::ProtocolError;

// User identity = opaque string issued by the auth subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse an identity coming off the wire. Surrounding whitespace is
    /// stripped; an empty identity is rejected.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::invalid("user id must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the conversation between two users.
///
/// Derived from the unordered participant pair: the ids are sorted, fed to
/// BLAKE3 as length-prefixed fields, and the first 16 bytes of the digest
/// are kept as lowercase hex. The same two users therefore always map to
/// the same conversation no matter who writes first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (first, second) = ordered_pair(a, b);

        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_CONVERSATION_ID);
        for id in [first, second] {
            hasher.update(&(id.0.len() as u64).to_le_bytes());
            hasher.update(id.0.as_bytes());
        }
        let hex = hasher.finalize().to_hex();

        Self(hex.as_str()[..CONVERSATION_ID_HEX_LEN].to_string())
    }

    /// Parse a conversation id supplied by a client.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let raw = raw.trim();
        let well_formed = raw.len() == CONVERSATION_ID_HEX_LEN
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(ProtocolError::invalid(format!(
                "malformed conversation id '{raw}'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort two participants so that storage always sees the same orientation.
pub fn ordered_pair<'a>(a: &'a UserId, b: &'a UserId) -> (&'a UserId, &'a UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Transport-assigned identity of one live connection (tab or device).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Media,
    #[serde(alias = "post")]
    PostShare,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
            Self::PostShare => "post_share",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "media" | "image" | "video" => Ok(Self::Media),
            "post" | "post_share" => Ok(Self::PostShare),
            other => Err(ProtocolError::invalid(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
