use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use athlinked_shared::{ConnectionId, ConversationId, ProtocolError};
use athlinked_store::StoreError;

/// Failures of a messaging operation (send or read acknowledgement).
///
/// Every variant except [`DeliveryError::TransportFailure`] is reported back
/// to the originating connection as a single `error` event.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not authenticated: announce your user id first")]
    Unauthenticated,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Not a participant of conversation {0}")]
    NotParticipant(ConversationId),

    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// Emission to one connection failed (outbox full or closed). Dropped for
    /// that connection; never fails the operation as a whole.
    #[error("Transport failure on connection {0}")]
    TransportFailure(ConnectionId),
}

impl DeliveryError {
    /// Text sent to the client. Store details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            DeliveryError::StoreFailure(_) => "Failed to process message".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ProtocolError> for DeliveryError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidRequest(reason) => DeliveryError::InvalidRequest(reason),
            ProtocolError::Malformed(e) => DeliveryError::InvalidRequest(e.to_string()),
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        DeliveryError::StoreFailure(err.to_string())
    }
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("record not found".to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidRequest(reason) => ServerError::BadRequest(reason),
            ProtocolError::Malformed(e) => ServerError::BadRequest(e.to_string()),
        }
    }
}

impl From<DeliveryError> for ServerError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::InvalidRequest(reason) => ServerError::BadRequest(reason),
            DeliveryError::Unauthenticated => {
                ServerError::Forbidden("not authenticated".to_string())
            }
            DeliveryError::ConversationNotFound(id) => {
                ServerError::NotFound(format!("conversation {id}"))
            }
            DeliveryError::NotParticipant(id) => {
                ServerError::Forbidden(format!("not a participant of conversation {id}"))
            }
            DeliveryError::StoreFailure(detail) => ServerError::Internal(detail),
            DeliveryError::TransportFailure(conn) => {
                ServerError::Internal(format!("transport failure on connection {conn}"))
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athlinked_shared::UserId;

    #[test]
    fn test_store_failure_is_generic_for_clients() {
        let err = DeliveryError::from(StoreError::Migration("disk on fire".into()));
        assert!(matches!(err, DeliveryError::StoreFailure(_)));
        assert!(!err.client_message().contains("disk on fire"));
    }

    #[test]
    fn test_protocol_error_maps_to_invalid_request() {
        let err = DeliveryError::from(ProtocolError::invalid("receiverId is required"));
        assert_eq!(err.client_message(), "Invalid request: receiverId is required");
    }

    #[test]
    fn test_http_status_mapping() {
        let resp = ServerError::from(StoreError::NotFound).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ServerError::from(DeliveryError::Unauthenticated).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_read_failures_map_to_404_and_403() {
        let id = ConversationId::for_pair(&UserId::new("a"), &UserId::new("b"));

        let resp = ServerError::from(DeliveryError::ConversationNotFound(id.clone())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let err = DeliveryError::NotParticipant(id);
        assert!(err.client_message().starts_with("Not a participant"));
        let resp = ServerError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
