use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The request is well-formed JSON but violates a messaging rule
    /// (missing receiver, no content, inconsistent type, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ProtocolError::InvalidRequest(reason.into())
    }
}
