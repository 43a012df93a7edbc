//! Connection registry: which live connections speak for which user.
//!
//! A user may hold any number of connections at once (tabs, devices). The
//! registry is the only place that mutates this mapping. It lives in memory
//! only; after a restart every user is offline until they reconnect and
//! announce again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use athlinked_shared::protocol::ServerEvent;
use athlinked_shared::{ConnectionId, UserId};

use crate::error::DeliveryError;

/// Sending half of a connection's bounded event queue. The connection's
/// writer task drains the other half onto the socket.
pub type Outbox = mpsc::Sender<ServerEvent>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Result of binding a connection to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// First announcement on this connection.
    Bound,
    /// Same user announced again; nothing changed.
    Unchanged,
    /// A different user announced; the connection moved over.
    Rebound { previous: UserId },
}

/// Snapshot of one connection, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user: Option<UserId>,
    pub joined_at: DateTime<Utc>,
}

struct Connection {
    user: Option<UserId>,
    joined_at: DateTime<Utc>,
    outbox: Outbox,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn detach(&mut self, id: &ConnectionId, user: &UserId) {
        if let Some(set) = self.by_user.get_mut(user) {
            set.remove(id);
            if set.is_empty() {
                self.by_user.remove(user);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted transport connection. It starts unbound.
    pub async fn register(&self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new();
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id,
            Connection {
                user: None,
                joined_at: Utc::now(),
                outbox,
            },
        );
        debug!(connection = %id, total = inner.connections.len(), "Connection registered");
        id
    }

    /// Bind `id` to `user`. Re-announcing the same user is a no-op; a
    /// different user replaces the previous binding (last bind wins).
    pub async fn bind(
        &self,
        id: ConnectionId,
        user: UserId,
    ) -> Result<BindOutcome, RegistryError> {
        let mut inner = self.inner.write().await;

        let conn = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        let previous = match conn.user.replace(user.clone()) {
            Some(prev) if prev == user => return Ok(BindOutcome::Unchanged),
            other => other,
        };

        if let Some(ref prev) = previous {
            inner.detach(&id, prev);
        }
        inner.by_user.entry(user.clone()).or_default().insert(id);

        match previous {
            None => {
                info!(connection = %id, user = %user, "Connection bound");
                Ok(BindOutcome::Bound)
            }
            Some(previous) => {
                warn!(
                    connection = %id,
                    previous = %previous,
                    user = %user,
                    "Connection re-announced as a different user"
                );
                Ok(BindOutcome::Rebound { previous })
            }
        }
    }

    /// Remove `id` from every user mapping. The connection stays registered
    /// but unbound. No-op if it was never bound.
    pub async fn unbind(&self, id: ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.write().await;
        let user = inner.connections.get_mut(&id)?.user.take()?;
        inner.detach(&id, &user);
        debug!(connection = %id, user = %user, "Connection unbound");
        Some(user)
    }

    /// Transport disconnect: unbind and forget the connection and its outbox.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<UserId> {
        let user = self.unbind(id).await;
        let mut inner = self.inner.write().await;
        inner.connections.remove(&id)?;
        if let Some(ref user) = user {
            if !inner.by_user.contains_key(user) {
                info!(user = %user, "User went offline");
            }
        }
        debug!(connection = %id, total = inner.connections.len(), "Connection removed");
        user
    }

    /// Live connections of `user`; empty means offline.
    pub async fn connections_for(&self, user: &UserId) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .by_user
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.inner
            .read()
            .await
            .by_user
            .get(user)
            .is_some_and(|set| !set.is_empty())
    }

    pub async fn user_of(&self, id: ConnectionId) -> Option<UserId> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .and_then(|c| c.user.clone())
    }

    pub async fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.inner.read().await.connections.get(&id).map(|c| ConnectionInfo {
            id,
            user: c.user.clone(),
            joined_at: c.joined_at,
        })
    }

    /// Queue `event` for one connection without waiting. A full or closed
    /// outbox is a [`DeliveryError::TransportFailure`] for that connection.
    pub async fn emit(&self, id: ConnectionId, event: ServerEvent) -> Result<(), DeliveryError> {
        let inner = self.inner.read().await;
        let conn = inner
            .connections
            .get(&id)
            .ok_or(DeliveryError::TransportFailure(id))?;
        try_push(id, &conn.outbox, event)
    }

    /// Queue `event` for every live connection of `user`. Per-connection
    /// failures are dropped. Returns how many connections accepted it.
    pub async fn emit_to_user(&self, user: &UserId, event: &ServerEvent) -> usize {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_user.get(user) else {
            return 0;
        };

        let mut delivered = 0;
        for id in ids {
            let Some(conn) = inner.connections.get(id) else {
                continue;
            };
            match try_push(*id, &conn.outbox, event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(user = %user, event = event.name(), error = %e, "Dropping event"),
            }
        }
        delivered
    }

    /// Queue `event` for each of `ids`. Same failure handling as
    /// [`Self::emit_to_user`]; returns how many connections accepted it.
    pub async fn emit_to_connections(
        &self,
        ids: &HashSet<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let inner = self.inner.read().await;
        let mut delivered = 0;
        for id in ids {
            let Some(conn) = inner.connections.get(id) else {
                continue;
            };
            match try_push(*id, &conn.outbox, event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(connection = %id, event = event.name(), error = %e, "Dropping event"),
            }
        }
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn online_user_count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }
}

fn try_push(id: ConnectionId, outbox: &Outbox, event: ServerEvent) -> Result<(), DeliveryError> {
    match outbox.try_send(event) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            debug!(connection = %id, "Outbox full, dropping event for slow connection");
            Err(DeliveryError::TransportFailure(id))
        }
        Err(TrySendError::Closed(_)) => Err(DeliveryError::TransportFailure(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athlinked_shared::protocol::UnreadCount;

    fn count(n: u32) -> ServerEvent {
        ServerEvent::MessageCountUpdate(UnreadCount { count: n })
    }

    #[tokio::test]
    async fn test_bind_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;
        let alice = UserId::new("alice");

        assert!(!registry.is_online(&alice).await);
        assert_eq!(registry.user_of(conn).await, None);

        assert_eq!(registry.bind(conn, alice.clone()).await, Ok(BindOutcome::Bound));
        assert!(registry.is_online(&alice).await);
        assert_eq!(registry.user_of(conn).await, Some(alice.clone()));
        assert_eq!(
            registry.connections_for(&alice).await,
            HashSet::from([conn])
        );
    }

    #[tokio::test]
    async fn test_bind_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;
        let alice = UserId::new("alice");

        registry.bind(conn, alice.clone()).await.unwrap();
        assert_eq!(
            registry.bind(conn, alice.clone()).await,
            Ok(BindOutcome::Unchanged)
        );
        assert_eq!(registry.connections_for(&alice).await.len(), 1);
    }

    #[tokio::test]
    async fn test_rebind_moves_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        registry.bind(conn, alice.clone()).await.unwrap();
        assert_eq!(
            registry.bind(conn, bob.clone()).await,
            Ok(BindOutcome::Rebound {
                previous: alice.clone()
            })
        );
        assert!(!registry.is_online(&alice).await);
        assert!(registry.is_online(&bob).await);
    }

    #[tokio::test]
    async fn test_bind_unknown_connection() {
        let registry = ConnectionRegistry::new();
        let ghost = ConnectionId::new();
        assert_eq!(
            registry.bind(ghost, UserId::new("x")).await,
            Err(RegistryError::UnknownConnection(ghost))
        );
    }

    #[tokio::test]
    async fn test_unbind_and_disconnect() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let tab1 = registry.register(tx1).await;
        let tab2 = registry.register(tx2).await;
        registry.bind(tab1, alice.clone()).await.unwrap();
        registry.bind(tab2, alice.clone()).await.unwrap();

        assert_eq!(registry.unbind(tab1).await, Some(alice.clone()));
        assert_eq!(registry.unbind(tab1).await, None);
        assert_eq!(registry.connection_count().await, 2);
        assert!(registry.is_online(&alice).await);

        assert_eq!(registry.disconnect(tab2).await, Some(alice.clone()));
        assert!(!registry.is_online(&alice).await);
        assert_eq!(registry.online_user_count().await, 0);
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.info(tab2).await.is_none());
        assert_eq!(registry.info(tab1).await.unwrap().user, None);
    }

    #[tokio::test]
    async fn test_emit_to_user_fans_out() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let tab1 = registry.register(tx1).await;
        let tab2 = registry.register(tx2).await;
        registry.bind(tab1, alice.clone()).await.unwrap();
        registry.bind(tab2, alice.clone()).await.unwrap();

        assert_eq!(registry.emit_to_user(&alice, &count(4)).await, 2);
        assert_eq!(rx1.try_recv().unwrap(), count(4));
        assert_eq!(rx2.try_recv().unwrap(), count(4));

        assert_eq!(registry.emit_to_user(&UserId::new("nobody"), &count(1)).await, 0);
    }

    #[tokio::test]
    async fn test_full_or_closed_outbox_is_transport_failure() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (gone_tx, gone_rx) = mpsc::channel(8);
        let (ok_tx, mut ok_rx) = mpsc::channel(8);
        let slow = registry.register(slow_tx).await;
        let gone = registry.register(gone_tx).await;
        let ok = registry.register(ok_tx).await;
        for c in [slow, gone, ok] {
            registry.bind(c, alice.clone()).await.unwrap();
        }
        drop(gone_rx);

        registry.emit(slow, count(0)).await.unwrap();
        assert!(matches!(
            registry.emit(slow, count(1)).await,
            Err(DeliveryError::TransportFailure(id)) if id == slow
        ));
        assert!(registry.emit(gone, count(1)).await.is_err());

        // Failing connections do not stop the healthy one.
        assert_eq!(registry.emit_to_user(&alice, &count(2)).await, 1);
        assert_eq!(ok_rx.try_recv().unwrap(), count(2));
    }

    #[tokio::test]
    async fn test_emit_to_resolved_connections() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, _rx3) = mpsc::channel(8);
        let a_tab = registry.register(tx1).await;
        let b_tab = registry.register(tx2).await;
        let b_gone = registry.register(tx3).await;
        registry.bind(a_tab, alice.clone()).await.unwrap();
        registry.bind(b_tab, bob.clone()).await.unwrap();
        registry.bind(b_gone, bob.clone()).await.unwrap();

        let mut targets = registry.connections_for(&bob).await;
        registry.disconnect(b_gone).await;
        targets.extend(registry.connections_for(&alice).await);

        assert_eq!(registry.emit_to_connections(&targets, &count(9)).await, 2);
        assert_eq!(rx1.try_recv().unwrap(), count(9));
        assert_eq!(rx2.try_recv().unwrap(), count(9));
        assert_eq!(registry.connections_for(&bob).await, HashSet::from([b_tab]));
    }
}
