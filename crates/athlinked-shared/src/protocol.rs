//! JSON event protocol spoken over the persistent connection.
//!
//! Every frame is a text frame of the form `{"event": <name>, "data": <payload>}`.
//! Client frames decode into [`ClientEvent`], server frames into
//! [`ServerEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::{PREVIEW_MAX_CHARS, PREVIEW_MEDIA, PREVIEW_SHARED_POST};
use crate::error::ProtocolError;
use crate::types::{ConversationId, MessageType, UserId};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Events a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Identity announcement; binds the connection to a user.
    #[serde(rename = "userId")]
    Announce(Announce),

    /// Request to send a direct message.
    #[serde(rename = "send_message")]
    SendMessage(SendMessageRequest),

    /// Read acknowledgement for one conversation.
    #[serde(rename = "mark_read")]
    MarkRead(MarkReadRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announce {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
}

/// Raw, loosely-typed send payload as it arrives from the client.
///
/// Nothing here is trusted; [`SendMessageRequest::validate`] turns it into
/// an [`OutgoingMessage`] before anything reaches the delivery engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    #[serde(
        default,
        rename = "conversationId",
        alias = "conversation_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,

    #[serde(
        default,
        rename = "receiverId",
        alias = "receiver_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub receiver_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkReadRequest {
    #[serde(rename = "conversationId", alias = "conversation_id")]
    pub conversation_id: String,
}

/// Content of a validated message. Each kind carries only what it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media {
        media_url: String,
        caption: Option<String>,
    },
    PostShare {
        post: Map<String, Value>,
        caption: Option<String>,
    },
}

impl MessageContent {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::Media { .. } => MessageType::Media,
            Self::PostShare { .. } => MessageType::PostShare,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Text { body } => Some(body),
            Self::Media { caption, .. } | Self::PostShare { caption, .. } => caption.as_deref(),
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Media { media_url, .. } => Some(media_url),
            _ => None,
        }
    }

    pub fn post_data(&self) -> Option<Value> {
        match self {
            Self::PostShare { post, .. } => Some(Value::Object(post.clone())),
            _ => None,
        }
    }
}

/// A send request that passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub receiver: UserId,
    pub conversation_id: ConversationId,
    pub content: MessageContent,
}

impl SendMessageRequest {
    /// Validate the raw payload on behalf of `sender`.
    ///
    /// Empty or whitespace-only strings count as absent. The message kind
    /// is inferred from the fields present (post data, then media, then
    /// text); an explicit `message_type` must agree with it.
    pub fn validate(
        &self,
        sender: &UserId,
        max_body_len: usize,
    ) -> Result<OutgoingMessage, ProtocolError> {
        let receiver = match non_blank(&self.receiver_id) {
            Some(raw) => UserId::parse(raw)?,
            None => return Err(ProtocolError::invalid("receiverId is required")),
        };

        if &receiver == sender {
            return Err(ProtocolError::invalid("cannot send a message to yourself"));
        }

        let conversation_id = ConversationId::for_pair(sender, &receiver);
        if let Some(claimed) = non_blank(&self.conversation_id) {
            if claimed.trim() != conversation_id.as_str() {
                return Err(ProtocolError::invalid(
                    "conversationId does not match the participants",
                ));
            }
        }

        let body = non_blank(&self.message).map(str::to_string);
        if let Some(ref text) = body {
            let len = text.chars().count();
            if len > max_body_len {
                return Err(ProtocolError::invalid(format!(
                    "message is too long ({len} chars, max {max_body_len})"
                )));
            }
        }

        let media_url = non_blank(&self.media_url).map(|s| s.trim().to_string());

        let post = match &self.post_data {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => return Err(ProtocolError::invalid("post_data must be an object")),
        };

        let content = match (post, media_url, body) {
            (Some(_), Some(_), _) => {
                return Err(ProtocolError::invalid(
                    "a shared post cannot also carry a media attachment",
                ))
            }
            (Some(post), None, caption) => MessageContent::PostShare { post, caption },
            (None, Some(media_url), caption) => MessageContent::Media { media_url, caption },
            (None, None, Some(body)) => MessageContent::Text { body },
            (None, None, None) => {
                return Err(ProtocolError::invalid(
                    "message must contain text, media or a shared post",
                ))
            }
        };

        if let Some(declared) = non_blank(&self.message_type) {
            let declared: MessageType = declared.parse()?;
            if declared != content.message_type() {
                return Err(ProtocolError::invalid(format!(
                    "message_type '{}' does not match content ({})",
                    declared,
                    content.message_type()
                )));
            }
        }

        Ok(OutgoingMessage {
            receiver,
            conversation_id,
            content,
        })
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Events the server pushes to connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(MessagePayload),
    MessageDelivered(DeliveryReceipt),
    ConversationUpdated(ConversationUpdate),
    MessageCountUpdate(UnreadCount),
    Error(ErrorPayload),
}

/// A persisted message as pushed to participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub message_id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: Option<String>,
    pub media_url: Option<String>,
    pub message_type: MessageType,
    pub post_data: Option<Value>,
    /// Store-assigned position within the conversation.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_delivered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationUpdate {
    pub conversation: ConversationSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub other_user_id: UserId,
    /// Preview of the latest message, see [`preview_text`].
    pub last_message: String,
    pub last_message_type: MessageType,
    pub last_sender_id: UserId,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        use crate::constants::*;
        match self {
            Self::ReceiveMessage(_) => EVENT_RECEIVE_MESSAGE,
            Self::MessageDelivered(_) => EVENT_MESSAGE_DELIVERED,
            Self::ConversationUpdated(_) => EVENT_CONVERSATION_UPDATED,
            Self::MessageCountUpdate(_) => EVENT_MESSAGE_COUNT_UPDATE,
            Self::Error(_) => EVENT_ERROR,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        use crate::constants::*;
        match self {
            Self::Announce(_) => EVENT_ANNOUNCE,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::MarkRead(_) => EVENT_MARK_READ,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Conversation-list preview for a message: the body truncated to
/// [`PREVIEW_MAX_CHARS`], or a placeholder for captionless media and posts.
pub fn preview_text(body: Option<&str>, message_type: MessageType) -> String {
    match body.map(str::trim).filter(|b| !b.is_empty()) {
        Some(text) if text.chars().count() > PREVIEW_MAX_CHARS => {
            let cut: String = text.chars().take(PREVIEW_MAX_CHARS - 3).collect();
            format!("{cut}...")
        }
        Some(text) => text.to_string(),
        None => match message_type {
            MessageType::PostShare => PREVIEW_SHARED_POST.to_string(),
            _ => PREVIEW_MEDIA.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sender() -> UserId {
        UserId::new("athlete-a")
    }

    fn request(receiver: &str) -> SendMessageRequest {
        SendMessageRequest {
            receiver_id: Some(receiver.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_announce() {
        let frame = r#"{"event":"userId","data":{"userId":"u-42"}}"#;
        let event = ClientEvent::from_json(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::Announce(Announce {
                user_id: "u-42".into()
            })
        );
    }

    #[test]
    fn test_decode_send_message_with_aliases() {
        let frame = r#"{"event":"send_message","data":{"receiver_id":"b","message":"hi"}}"#;
        let ClientEvent::SendMessage(req) = ClientEvent::from_json(frame).unwrap() else {
            panic!("expected send_message");
        };
        assert_eq!(req.receiver_id.as_deref(), Some("b"));
        assert_eq!(req.message.as_deref(), Some("hi"));
        assert!(req.media_url.is_none());
    }

    #[test]
    fn test_decode_unknown_event_is_malformed() {
        let err = ClientEvent::from_json(r#"{"event":"typing","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_server_event_wire_names() {
        let frame = ServerEvent::MessageCountUpdate(UnreadCount { count: 3 })
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"event": "message_count_update", "data": {"count": 3}}));

        let err = ServerEvent::error("boom").to_json().unwrap();
        assert!(err.contains(r#""event":"error""#));
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let mut req = request("coach-b");
        req.message = Some(String::new());
        let err = req.validate(&sender(), 100).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_missing_receiver() {
        let req = SendMessageRequest {
            message: Some("hi".into()),
            ..Default::default()
        };
        assert!(req.validate(&sender(), 100).is_err());
    }

    #[test]
    fn test_validate_rejects_self_message() {
        let mut req = request("athlete-a");
        req.message = Some("note to self".into());
        assert!(req.validate(&sender(), 100).is_err());
    }

    #[test]
    fn test_validate_text() {
        let mut req = request("coach-b");
        req.message = Some("hi".into());
        let out = req.validate(&sender(), 100).unwrap();
        assert_eq!(out.receiver, UserId::new("coach-b"));
        assert_eq!(out.content, MessageContent::Text { body: "hi".into() });
        assert_eq!(
            out.conversation_id,
            ConversationId::for_pair(&sender(), &UserId::new("coach-b"))
        );
    }

    #[test]
    fn test_validate_media_only() {
        let mut req = request("coach-b");
        req.media_url = Some("https://cdn.example/clip.mp4".into());
        let out = req.validate(&sender(), 100).unwrap();
        assert_eq!(out.content.message_type(), MessageType::Media);
        assert_eq!(out.content.body(), None);
        assert_eq!(out.content.media_url(), Some("https://cdn.example/clip.mp4"));
    }

    #[test]
    fn test_validate_post_share_only() {
        let mut req = request("coach-b");
        req.post_data = Some(json!({"post_id": "p-9", "caption": "Game day"}));
        req.message_type = Some("post".into());
        let out = req.validate(&sender(), 100).unwrap();
        assert_eq!(out.content.message_type(), MessageType::PostShare);
        assert_eq!(out.content.post_data().unwrap()["post_id"], "p-9");
    }

    #[test]
    fn test_validate_type_mismatch() {
        let mut req = request("coach-b");
        req.message = Some("hi".into());
        req.message_type = Some("media".into());
        assert!(req.validate(&sender(), 100).is_err());
    }

    #[test]
    fn test_validate_rejects_non_object_post() {
        let mut req = request("coach-b");
        req.post_data = Some(json!("p-9"));
        assert!(req.validate(&sender(), 100).is_err());
    }

    #[test]
    fn test_validate_conversation_id_must_match() {
        let mut req = request("coach-b");
        req.message = Some("hi".into());
        req.conversation_id =
            Some(ConversationId::for_pair(&sender(), &UserId::new("someone-else")).0);
        assert!(req.validate(&sender(), 100).is_err());

        req.conversation_id =
            Some(ConversationId::for_pair(&UserId::new("coach-b"), &sender()).0);
        assert!(req.validate(&sender(), 100).is_ok());
    }

    #[test]
    fn test_validate_length_limit() {
        let mut req = request("coach-b");
        req.message = Some("x".repeat(11));
        assert!(req.validate(&sender(), 10).is_err());
        req.message = Some("x".repeat(10));
        assert!(req.validate(&sender(), 10).is_ok());
    }

    #[test]
    fn test_preview_text() {
        assert_eq!(preview_text(Some("hello"), MessageType::Text), "hello");
        assert_eq!(preview_text(None, MessageType::Media), PREVIEW_MEDIA);
        assert_eq!(preview_text(Some("  "), MessageType::PostShare), PREVIEW_SHARED_POST);

        let long = "y".repeat(PREVIEW_MAX_CHARS + 10);
        let preview = preview_text(Some(&long), MessageType::Text);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
        assert!(preview.ends_with("..."));
    }
}
