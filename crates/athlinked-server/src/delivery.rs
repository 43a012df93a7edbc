//! Delivery engine: persist a message, fan it out to both participants'
//! live connections, refresh their conversation lists and acknowledge
//! delivery to the sender.
//!
//! Delivery is at-most-once per live connection and never retried. The
//! durable record is the source of truth; a client that missed an event
//! re-fetches over HTTP after reconnecting.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use athlinked_shared::protocol::{DeliveryReceipt, SendMessageRequest, ServerEvent};
use athlinked_shared::{ConnectionId, ConversationId, UserId};
use athlinked_store::{Message, MessagingStore, NewMessage, StoreError};

use crate::error::DeliveryError;
use crate::rate_limit::SendRateLimiter;
use crate::registry::ConnectionRegistry;
use crate::sync::{store_call, ConversationSync};

#[derive(Clone)]
pub struct DeliveryEngine {
    registry: ConnectionRegistry,
    store: Arc<dyn MessagingStore>,
    sync: ConversationSync,
    send_limiter: SendRateLimiter,
    max_message_len: usize,
}

impl DeliveryEngine {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessagingStore>,
        sync: ConversationSync,
        send_limiter: SendRateLimiter,
        max_message_len: usize,
    ) -> Self {
        Self {
            registry,
            store,
            sync,
            send_limiter,
            max_message_len,
        }
    }

    /// Handle a `send_message` request arriving on `origin`.
    pub async fn send_message(
        &self,
        origin: ConnectionId,
        request: SendMessageRequest,
    ) -> Result<Message, DeliveryError> {
        let sender = self
            .registry
            .user_of(origin)
            .await
            .ok_or(DeliveryError::Unauthenticated)?;

        if !self.send_limiter.check(&sender).await {
            warn!(user = %sender, "Send rate limit exceeded");
            return Err(DeliveryError::InvalidRequest("rate limit exceeded".into()));
        }

        let outgoing = request.validate(&sender, self.max_message_len)?;
        let new_message = NewMessage::new(sender.clone(), outgoing);

        let message = store_call(&self.store, move |store| store.send_message(new_message))
            .await
            .map_err(|e| {
                error!(user = %sender, error = %e, "Failed to persist message");
                e
            })?;

        let receiver = message.receiver_id.clone();
        let receiver_conns = self.registry.connections_for(&receiver).await;
        let sender_conns = self.registry.connections_for(&sender).await;
        let receiver_online = !receiver_conns.is_empty();

        let event = ServerEvent::ReceiveMessage(message.to_payload(receiver_online));
        let to_receiver = self.registry.emit_to_connections(&receiver_conns, &event).await;
        let to_sender = self.registry.emit_to_connections(&sender_conns, &event).await;

        info!(
            message = %message.id,
            conversation = %message.conversation_id,
            seq = message.seq,
            sender = %sender,
            receiver = %receiver,
            receiver_online,
            to_receiver,
            to_sender,
            "Message delivered"
        );

        let (sender_sync, receiver_sync) = tokio::join!(
            self.sync.sync_participant(&sender, &message.conversation_id),
            self.sync.sync_participant(&receiver, &message.conversation_id),
        );
        // The message is committed; a failed sync only leaves a stale list.
        for (user, result) in [(&sender, sender_sync), (&receiver, receiver_sync)] {
            if let Err(e) = result {
                warn!(user = %user, error = %e, "Sync after send failed");
            }
        }

        if receiver_online {
            let receipt = ServerEvent::MessageDelivered(DeliveryReceipt {
                message_id: message.id,
                conversation_id: message.conversation_id.clone(),
            });
            if let Err(e) = self.registry.emit(origin, receipt).await {
                debug!(connection = %origin, error = %e, "Delivery receipt dropped");
            }
        }

        Ok(message)
    }

    /// Handle a `mark_read` acknowledgement arriving on `origin`.
    pub async fn mark_read(
        &self,
        origin: ConnectionId,
        conversation_id: &str,
    ) -> Result<u32, DeliveryError> {
        let reader = self
            .registry
            .user_of(origin)
            .await
            .ok_or(DeliveryError::Unauthenticated)?;
        let conversation_id = ConversationId::parse(conversation_id)?;
        self.mark_read_as(&reader, &conversation_id).await
    }

    /// Reset `reader`'s unread counter for one conversation and push the
    /// refreshed state to the reader's connections. Returns how many unread
    /// messages were cleared.
    pub async fn mark_read_as(
        &self,
        reader: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<u32, DeliveryError> {
        let who = reader.clone();
        let conv = conversation_id.clone();
        let cleared = store_call(&self.store, move |store| match store.conversation(&conv) {
            Ok(c) if c.includes(&who) => store.mark_read(&who, &conv).map(Ok),
            Ok(_) => Ok(Err(DeliveryError::NotParticipant(conv))),
            Err(StoreError::NotFound) => Ok(Err(DeliveryError::ConversationNotFound(conv))),
            Err(e) => Err(e),
        })
        .await??;

        debug!(user = %reader, conversation = %conversation_id, cleared, "Conversation read");

        if let Err(e) = self.sync.sync_participant(reader, conversation_id).await {
            warn!(user = %reader, error = %e, "Sync after read failed");
        }
        Ok(cleared)
    }
}
