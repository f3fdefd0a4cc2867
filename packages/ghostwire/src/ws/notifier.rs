//! Full-state broadcast to every open connection.

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::HubMetrics;
use crate::store::DocumentStore;

use super::protocol::ServerFrame;
use super::registry::ConnectionRegistry;

pub struct BroadcastNotifier {
    store: Arc<DocumentStore>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<HubMetrics>,
}

impl BroadcastNotifier {
    pub fn new(
        store: Arc<DocumentStore>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Push the current document and the connected identities to every open
    /// connection, identified or not. Returns how many connections accepted it.
    ///
    /// A store failure skips the broadcast. A connection whose queue is closed or
    /// full misses this push; the next one carries the complete state anyway.
    pub async fn broadcast_full_state(&self) -> usize {
        let document = match self.store.read().await {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Skipping broadcast, document unreadable");
                self.metrics.store_error();
                return 0;
            }
        };
        let connected_clients = self.registry.live_identities().await.into_iter().collect();
        let frame = Arc::new(ServerFrame::DbPush {
            payload: document,
            connected_clients,
        });

        let mut accepted = 0;
        for (conn_id, tx) in self.registry.all_senders().await {
            match tx.try_send(frame.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = %conn_id, "Outbound queue full, broadcast dropped");
                    self.metrics.frame_dropped();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn_id = %conn_id, "Connection closing, broadcast skipped");
                    self.metrics.frame_dropped();
                }
            }
        }
        self.metrics.broadcast();
        debug!(accepted, "Full state broadcast");
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Profile};
    use crate::ws::protocol::Outbound;
    use tokio::sync::mpsc;

    struct Fixture {
        notifier: BroadcastNotifier,
        store: Arc<DocumentStore>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<HubMetrics>,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(tmp.path().join("database.json"), None));
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(HubMetrics::new());
        Fixture {
            notifier: BroadcastNotifier::new(store.clone(), registry.clone(), metrics.clone()),
            store,
            registry,
            metrics,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_unidentified_connections() {
        let f = fixture();
        let mut doc = Document::default();
        doc.profiles.push(Profile::citizen(1, "ada"));
        f.store.write(&doc).await.unwrap();

        let (tx_a, mut rx_a) = mpsc::channel::<Outbound>(4);
        let (tx_b, mut rx_b) = mpsc::channel::<Outbound>(4);
        f.registry.attach("a".into(), tx_a).await;
        f.registry.attach("b".into(), tx_b).await;
        f.registry.bind(1, "a").await;

        assert_eq!(f.notifier.broadcast_full_state().await, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().as_deref() {
                Ok(ServerFrame::DbPush {
                    payload,
                    connected_clients,
                }) => {
                    assert_eq!(payload, &doc);
                    assert_eq!(connected_clients, &[1]);
                }
                other => panic!("Expected DbPush, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_full_queue_is_skipped() {
        let f = fixture();
        let (tx, _rx) = mpsc::channel::<Outbound>(1);
        f.registry.attach("slow".into(), tx).await;

        assert_eq!(f.notifier.broadcast_full_state().await, 1);
        // Queue still holds the first push
        assert_eq!(f.notifier.broadcast_full_state().await, 0);
        assert_eq!(f.metrics.snapshot().frames.dropped, 1);
    }

    #[tokio::test]
    async fn test_unreadable_store_skips_broadcast() {
        let f = fixture();
        std::fs::write(f.store.path(), "[[[").unwrap();
        let (tx, mut rx) = mpsc::channel::<Outbound>(4);
        f.registry.attach("a".into(), tx).await;

        assert_eq!(f.notifier.broadcast_full_state().await, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(f.metrics.snapshot().errors.store, 1);
    }
}
