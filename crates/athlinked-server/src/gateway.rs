//! WebSocket gateway: one socket per browser tab.
//!
//! Each accepted socket gets a bounded outbox registered with the
//! [`ConnectionRegistry`] and a writer task draining it. The handler loop
//! itself reads client frames and dispatches them to the delivery engine.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use athlinked_shared::protocol::{Announce, ClientEvent, ServerEvent};
use athlinked_shared::{ConnectionId, UserId};

use crate::api::AppState;
use crate::delivery::DeliveryEngine;
use crate::registry::{BindOutcome, ConnectionRegistry};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut events) = mpsc::channel::<ServerEvent>(state.config.outbox_capacity);
    let conn = state.registry.register(outbox).await;
    info!(connection = %conn, "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection = %conn, event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handle_frame(&state.engine, &state.registry, conn, text.as_str()).await;
            }
            Ok(Message::Binary(_)) => {
                debug!(connection = %conn, "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by the transport.
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %conn, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    let session_secs = state
        .registry
        .info(conn)
        .await
        .map(|c| (chrono::Utc::now() - c.joined_at).num_seconds());
    let user = state.registry.disconnect(conn).await;
    writer.abort();
    info!(connection = %conn, user = ?user, session_secs, "WebSocket disconnected");
}

/// Decode one text frame and act on it. Every failure is answered with a
/// single `error` event to this connection.
pub(crate) async fn handle_frame(
    engine: &DeliveryEngine,
    registry: &ConnectionRegistry,
    conn: ConnectionId,
    frame: &str,
) {
    let event = match ClientEvent::from_json(frame) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection = %conn, error = %e, "Malformed frame");
            reply_error(registry, conn, "Invalid message format").await;
            return;
        }
    };

    match event {
        ClientEvent::Announce(Announce { user_id }) => {
            let user = match UserId::parse(&user_id) {
                Ok(user) => user,
                Err(e) => {
                    reply_error(registry, conn, e.to_string()).await;
                    return;
                }
            };
            match registry.bind(conn, user.clone()).await {
                Ok(BindOutcome::Unchanged) => {}
                Ok(_) => debug!(connection = %conn, user = %user, "Identity announced"),
                Err(e) => warn!(connection = %conn, error = %e, "Announce on a dropped connection"),
            }
        }
        ClientEvent::SendMessage(request) => {
            if let Err(e) = engine.send_message(conn, request).await {
                reply_error(registry, conn, e.client_message()).await;
            }
        }
        ClientEvent::MarkRead(request) => {
            if let Err(e) = engine.mark_read(conn, &request.conversation_id).await {
                reply_error(registry, conn, e.client_message()).await;
            }
        }
    }
}

async fn reply_error(registry: &ConnectionRegistry, conn: ConnectionId, message: impl Into<String>) {
    if let Err(e) = registry.emit(conn, ServerEvent::error(message)).await {
        debug!(connection = %conn, error = %e, "Error event dropped");
    }
}
