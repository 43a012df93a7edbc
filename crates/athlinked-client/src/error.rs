use thiserror::Error;

use athlinked_shared::ProtocolError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Session has not announced a user yet")]
    NotAnnounced,

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed")]
    Closed,
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(ProtocolError::Malformed(err))
    }
}
