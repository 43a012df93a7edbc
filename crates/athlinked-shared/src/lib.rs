//! # athlinked-shared
//!
//! Types shared by the AthLinked messaging server, store and client:
//! identifiers, the JSON event protocol spoken over the persistent
//! connection, and validation of outbound message requests.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::{ConnectionId, ConversationId, MessageType, UserId};
