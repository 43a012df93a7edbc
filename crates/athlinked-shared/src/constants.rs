/// Protocol version advertised by `/health` and `/info`
pub const PROTOCOL_VERSION: &str = "athlinked-messaging/1";

/// Path of the WebSocket endpoint
pub const WS_PATH: &str = "/ws";

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum message body length in characters
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;

/// Maximum length of a conversation preview in characters
pub const PREVIEW_MAX_CHARS: usize = 120;

/// Preview shown for a media message without a caption
pub const PREVIEW_MEDIA: &str = "[media]";

/// Preview shown for a shared post without a caption
pub const PREVIEW_SHARED_POST: &str = "[shared post]";

/// Key derivation context for conversation ids (BLAKE3)
pub const KDF_CONTEXT_CONVERSATION_ID: &str = "athlinked-conversation-id-v1";

/// Number of hex characters kept from the conversation id hash
pub const CONVERSATION_ID_HEX_LEN: usize = 32;

/// Client → server event names
pub const EVENT_ANNOUNCE: &str = "userId";
pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_MARK_READ: &str = "mark_read";

/// Server → client event names
pub const EVENT_RECEIVE_MESSAGE: &str = "receive_message";
pub const EVENT_MESSAGE_DELIVERED: &str = "message_delivered";
pub const EVENT_CONVERSATION_UPDATED: &str = "conversation_updated";
pub const EVENT_MESSAGE_COUNT_UPDATE: &str = "message_count_update";
pub const EVENT_ERROR: &str = "error";

/// Default page size of the message history endpoint
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Largest page the message history endpoint returns
pub const MAX_HISTORY_LIMIT: u32 = 200;
