//! Connection Registry
//!
//! Tracks every open connection and which identity, if any, each one is bound to.
//! Has its own lock, independent of the document store; callers never hold both.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::models::ProfileId;

use super::protocol::Outbound;

pub type ConnectionId = String;
pub type FrameSender = mpsc::Sender<Outbound>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No live binding for the identity, or its connection has gone away.
    /// The ordinary "offline" path, not an error.
    NotConnected,
    /// The connection is not draining its queue; this copy was dropped.
    QueueFull,
}

#[derive(Default)]
struct Bindings {
    /// Every open connection, identified or not
    connections: HashMap<ConnectionId, FrameSender>,
    /// identity -> connection currently bound to it
    by_identity: HashMap<ProfileId, ConnectionId>,
    /// connection -> identity it is bound to (back-reference for O(1) unbind)
    by_connection: HashMap<ConnectionId, ProfileId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Bindings>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open connection and its outbound queue.
    pub async fn attach(&self, connection_id: ConnectionId, sender: FrameSender) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(connection_id, sender);
    }

    /// Forget a closed connection. Returns the identity it was bound to, if the
    /// binding was still its own.
    pub async fn detach(&self, connection_id: &str) -> Option<ProfileId> {
        let mut inner = self.inner.write().await;
        inner.connections.remove(connection_id);
        Self::unbind_locked(&mut inner, connection_id)
    }

    /// Bind `identity` to `connection_id`. A previous connection bound to the same
    /// identity is displaced silently (last writer wins). A connection that was
    /// bound to a different identity moves to the new one.
    ///
    /// Returns false if the connection is not attached.
    pub async fn bind(&self, identity: ProfileId, connection_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(connection_id) {
            return false;
        }

        if let Some(previous) = inner.by_connection.get(connection_id).copied() {
            if previous != identity {
                Self::unbind_locked(&mut inner, connection_id);
            }
        }
        if let Some(displaced) = inner
            .by_identity
            .insert(identity, connection_id.to_string())
        {
            if displaced != connection_id {
                inner.by_connection.remove(&displaced);
                info!(
                    identity,
                    displaced = %displaced,
                    conn_id = %connection_id,
                    "Identity rebound to a new connection"
                );
            }
        }
        inner
            .by_connection
            .insert(connection_id.to_string(), identity);
        debug!(identity, conn_id = %connection_id, "Identity bound");
        true
    }

    /// Drop the binding held by `connection_id`, leaving the connection attached.
    /// Closing connections go through `detach`, which unbinds under the same lock.
    #[cfg(test)]
    pub async fn unbind(&self, connection_id: &str) -> Option<ProfileId> {
        let mut inner = self.inner.write().await;
        Self::unbind_locked(&mut inner, connection_id)
    }

    fn unbind_locked(inner: &mut Bindings, connection_id: &str) -> Option<ProfileId> {
        let identity = inner.by_connection.remove(connection_id)?;
        // Only remove the forward entry if it still points at this connection
        if inner
            .by_identity
            .get(&identity)
            .is_some_and(|bound| bound == connection_id)
        {
            inner.by_identity.remove(&identity);
        }
        debug!(identity, conn_id = %connection_id, "Identity unbound");
        Some(identity)
    }

    pub async fn is_live(&self, identity: ProfileId) -> bool {
        self.inner.read().await.by_identity.contains_key(&identity)
    }

    /// Identities with a live binding, ascending.
    pub async fn live_identities(&self) -> BTreeSet<ProfileId> {
        self.inner.read().await.by_identity.keys().copied().collect()
    }

    /// The connection currently bound to `identity`.
    #[cfg(test)]
    pub async fn connection_for(&self, identity: ProfileId) -> Option<ConnectionId> {
        self.inner.read().await.by_identity.get(&identity).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Queue a frame for the connection bound to `identity`. Never waits for
    /// queue space, so a stalled connection cannot hold up the caller.
    pub async fn send(&self, identity: ProfileId, frame: Outbound) -> DeliveryOutcome {
        // Clone the sender out so the registry lock is not held while queueing
        let sender = {
            let inner = self.inner.read().await;
            inner
                .by_identity
                .get(&identity)
                .and_then(|conn| inner.connections.get(conn))
                .cloned()
        };
        let Some(tx) = sender else {
            return DeliveryOutcome::NotConnected;
        };
        match tx.try_send(frame) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => DeliveryOutcome::QueueFull,
            Err(TrySendError::Closed(_)) => DeliveryOutcome::NotConnected,
        }
    }

    /// Snapshot of every open connection's outbound queue.
    pub async fn all_senders(&self) -> Vec<(ConnectionId, FrameSender)> {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect()
    }
}
