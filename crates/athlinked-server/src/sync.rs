//! Conversation sync: push a participant's fresh conversation summary and
//! unread badge to all of their live connections.
//!
//! Always recomputes from the durable store, so running it twice is harmless.
//! Passes for the same user are serialized: each one reads the store and
//! emits while holding that user's lock, so a slower pass can never push a
//! badge older than one already sent.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use athlinked_shared::protocol::{ConversationSummary, ConversationUpdate, ServerEvent, UnreadCount};
use athlinked_shared::{ConversationId, UserId};
use athlinked_store::{MessagingStore, StoreError};

use crate::error::DeliveryError;
use crate::registry::ConnectionRegistry;

/// What a sync pass did for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// No live connections; the store was not touched.
    Offline,
    Synced {
        /// Connections that accepted the badge update.
        connections: usize,
        total_unread: u32,
        /// Fresh summary of the changed conversation, if the user has one.
        summary: Option<ConversationSummary>,
    },
}

/// Run a synchronous store call on the blocking pool.
pub(crate) async fn store_call<T, F>(
    store: &Arc<dyn MessagingStore>,
    call: F,
) -> Result<T, DeliveryError>
where
    T: Send + 'static,
    F: FnOnce(&dyn MessagingStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| DeliveryError::StoreFailure(format!("store task failed: {e}")))?
        .map_err(DeliveryError::from)
}

type UserLocks = HashMap<UserId, Arc<Mutex<()>>>;

#[derive(Clone)]
pub struct ConversationSync {
    registry: ConnectionRegistry,
    store: Arc<dyn MessagingStore>,
    /// Users with a pass running or waiting. Entries go away with the last
    /// pass for that user.
    in_flight: Arc<Mutex<UserLocks>>,
}

impl ConversationSync {
    pub fn new(registry: ConnectionRegistry, store: Arc<dyn MessagingStore>) -> Self {
        Self {
            registry,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn sync_participant(
        &self,
        user: &UserId,
        changed: &ConversationId,
    ) -> Result<SyncReport, DeliveryError> {
        if !self.registry.is_online(user).await {
            debug!(user = %user, "Skipping sync for offline user");
            return Ok(SyncReport::Offline);
        }

        let lock = self.user_lock(user).await;
        let result = {
            let _turn = lock.lock().await;
            self.fetch_and_push(user, changed).await
        };
        self.release_user_lock(user, lock).await;
        result
    }

    async fn user_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.in_flight.lock().await;
        Arc::clone(locks.entry(user.clone()).or_default())
    }

    async fn release_user_lock(&self, user: &UserId, lock: Arc<Mutex<()>>) {
        let mut locks = self.in_flight.lock().await;
        // Held only by the map and by us: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user);
        }
    }

    async fn fetch_and_push(
        &self,
        user: &UserId,
        changed: &ConversationId,
    ) -> Result<SyncReport, DeliveryError> {
        let owner = user.clone();
        let (summaries, total_unread) = store_call(&self.store, move |store| {
            Ok((store.conversations_for(&owner)?, store.total_unread(&owner)?))
        })
        .await
        .map_err(|e| {
            error!(user = %user, conversation = %changed, error = %e, "Conversation sync failed");
            e
        })?;

        let mut by_id: HashMap<ConversationId, ConversationSummary> = summaries
            .into_iter()
            .map(|s| (s.conversation_id.clone(), s))
            .collect();
        let summary = by_id.remove(changed);

        match summary {
            Some(ref conversation) => {
                let event = ServerEvent::ConversationUpdated(ConversationUpdate {
                    conversation: conversation.clone(),
                });
                self.registry.emit_to_user(user, &event).await;
            }
            None => debug!(user = %user, conversation = %changed, "No summary for conversation"),
        }

        let badge = ServerEvent::MessageCountUpdate(UnreadCount {
            count: total_unread,
        });
        let connections = self.registry.emit_to_user(user, &badge).await;

        debug!(user = %user, connections, total_unread, "Conversation sync pushed");
        Ok(SyncReport::Synced {
            connections,
            total_unread,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;
    use crate::testing::{bound_connection, drain, text_message, FailingStore};
    use athlinked_store::{
        Conversation, ConversationStore, Message, MessageStore, NewMessage, SqliteStore,
    };

    /// Real store whose first `total_unread` read parks until released, so a
    /// sync pass can be held between its store read and its emits.
    struct GatedStore {
        inner: Arc<SqliteStore>,
        reads: AtomicUsize,
        parked: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        release: std::sync::Mutex<std_mpsc::Receiver<()>>,
    }

    impl MessageStore for GatedStore {
        fn send_message(&self, message: NewMessage) -> Result<Message, StoreError> {
            self.inner.send_message(message)
        }

        fn messages_in(
            &self,
            conversation_id: &ConversationId,
            limit: u32,
            before_seq: Option<i64>,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.messages_in(conversation_id, limit, before_seq)
        }
    }

    impl ConversationStore for GatedStore {
        fn conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
            self.inner.conversation(id)
        }

        fn conversations_for(&self, user: &UserId) -> Result<Vec<ConversationSummary>, StoreError> {
            self.inner.conversations_for(user)
        }

        fn total_unread(&self, user: &UserId) -> Result<u32, StoreError> {
            let count = self.inner.total_unread(user)?;
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(parked) = self.parked.lock().unwrap().take() {
                    let _ = parked.send(());
                }
                let _ = self.release.lock().unwrap().recv();
            }
            Ok(count)
        }

        fn mark_read(&self, user: &UserId, conversation_id: &ConversationId) -> Result<u32, StoreError> {
            self.inner.mark_read(user, conversation_id)
        }
    }

    #[tokio::test]
    async fn test_offline_user_skips_store() {
        let registry = ConnectionRegistry::new();
        let store: Arc<dyn MessagingStore> = Arc::new(FailingStore);
        let sync = ConversationSync::new(registry, store);

        let a = UserId::new("a");
        let b = UserId::new("b");
        let report = sync
            .sync_participant(&a, &ConversationId::for_pair(&a, &b))
            .await
            .unwrap();
        assert_eq!(report, SyncReport::Offline);
    }

    #[tokio::test]
    async fn test_pushes_summary_and_badge_to_every_tab() {
        let registry = ConnectionRegistry::new();
        let sqlite = SqliteStore::open_in_memory().unwrap();
        sqlite.send_message(text_message("a", "b", "one")).unwrap();
        let sent = sqlite.send_message(text_message("a", "b", "two")).unwrap();
        sqlite.send_message(text_message("c", "b", "other")).unwrap();
        let store: Arc<dyn MessagingStore> = Arc::new(sqlite);

        let b = UserId::new("b");
        let (_tab1, mut rx1) = bound_connection(&registry, &b).await;
        let (_tab2, mut rx2) = bound_connection(&registry, &b).await;

        let sync = ConversationSync::new(registry, store);
        let report = sync
            .sync_participant(&b, &sent.conversation_id)
            .await
            .unwrap();

        let SyncReport::Synced {
            connections,
            total_unread,
            summary,
        } = report
        else {
            panic!("expected a synced report");
        };
        assert_eq!(connections, 2);
        assert_eq!(total_unread, 3);
        let summary = summary.unwrap();
        assert_eq!(summary.last_message, "two");
        assert_eq!(summary.unread_count, 2);

        for rx in [&mut rx1, &mut rx2] {
            let events = drain(rx);
            assert_eq!(events.len(), 2);
            assert!(matches!(
                &events[0],
                ServerEvent::ConversationUpdated(u) if u.conversation == summary
            ));
            assert_eq!(
                events[1],
                ServerEvent::MessageCountUpdate(UnreadCount { count: 3 })
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_conversation_still_sends_badge() {
        let registry = ConnectionRegistry::new();
        let store: Arc<dyn MessagingStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let a = UserId::new("a");
        let (_conn, mut rx) = bound_connection(&registry, &a).await;

        let sync = ConversationSync::new(registry, store);
        let missing = ConversationId::for_pair(&a, &UserId::new("z"));
        let report = sync.sync_participant(&a, &missing).await.unwrap();

        assert!(matches!(report, SyncReport::Synced { summary: None, .. }));
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::MessageCountUpdate(UnreadCount { count: 0 })]
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_returned_not_emitted() {
        let registry = ConnectionRegistry::new();
        let a = UserId::new("a");
        let (_conn, mut rx) = bound_connection(&registry, &a).await;

        let sync = ConversationSync::new(registry, Arc::new(FailingStore));
        let conv = ConversationId::for_pair(&a, &UserId::new("b"));
        let err = sync.sync_participant(&a, &conv).await.unwrap_err();

        assert!(matches!(err, DeliveryError::StoreFailure(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_syncs_push_badges_in_commit_order() {
        let registry = ConnectionRegistry::new();
        let sqlite = Arc::new(SqliteStore::open_in_memory().unwrap());
        let first = sqlite.send_message(text_message("a", "b", "one")).unwrap();

        let (parked_tx, parked_rx) = oneshot::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: sqlite.clone(),
            reads: AtomicUsize::new(0),
            parked: std::sync::Mutex::new(Some(parked_tx)),
            release: std::sync::Mutex::new(release_rx),
        });

        let b = UserId::new("b");
        let (_tab, mut rx) = bound_connection(&registry, &b).await;
        let sync = ConversationSync::new(registry, store);

        // First pass reads a total of 1, then stalls before emitting.
        let stale = tokio::spawn({
            let (sync, b) = (sync.clone(), b.clone());
            let conv = first.conversation_id.clone();
            async move { sync.sync_participant(&b, &conv).await }
        });
        parked_rx.await.unwrap();

        let second = sqlite.send_message(text_message("c", "b", "two")).unwrap();
        let fresh = tokio::spawn({
            let (sync, b) = (sync.clone(), b.clone());
            let conv = second.conversation_id.clone();
            async move { sync.sync_participant(&b, &conv).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        release_tx.send(()).unwrap();

        stale.await.unwrap().unwrap();
        fresh.await.unwrap().unwrap();

        let badges: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageCountUpdate(c) => Some(c.count),
                _ => None,
            })
            .collect();
        assert_eq!(badges, vec![1, 2]);
        assert_eq!(sqlite.total_unread(&b).unwrap(), 2);
        assert!(sync.in_flight.lock().await.is_empty());
    }
}
