//! Message Router
//!
//! Persists a chat message, then fans it out to the connections that should see it.
//! Persistence happens inside the store's section; deliveries happen after it is
//! released, against the registry's view at that moment.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::metrics::HubMetrics;
use crate::models::{ChatMessage, OBSERVER_ID, ProfileId};
use crate::store::DocumentStore;

use super::protocol::{MessageDelivery, ServerFrame};
use super::registry::{ConnectionRegistry, DeliveryOutcome};

/// Which branch of the routing rules a message took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Sender and recipient are both connected
    PeerToPeer,
    /// Connected sender, offline recipient: the observer plays the recipient
    Simulation,
    /// Sender offline (typically the observer acting as someone): the recipient
    /// gets it
    Injected,
}

/// One planned copy of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub recipient: ProfileId,
    pub simulation: bool,
}

impl Delivery {
    fn plain(recipient: ProfileId) -> Self {
        Self {
            recipient,
            simulation: false,
        }
    }
}

/// Decide who receives a message, given who is connected.
///
/// The observer is always planned a copy; it is flagged only on the simulation
/// branch. Copies aimed at the same identity collapse into one and the first
/// planned copy wins. Whether the observer is actually connected is settled at
/// send time.
pub fn plan_deliveries(
    from: ProfileId,
    to: ProfileId,
    sender_live: bool,
    recipient_live: bool,
) -> (Route, Vec<Delivery>) {
    let (route, planned) = match (sender_live, recipient_live) {
        (true, true) => (
            Route::PeerToPeer,
            vec![
                Delivery::plain(from),
                Delivery::plain(to),
                Delivery::plain(OBSERVER_ID),
            ],
        ),
        (true, false) => (
            Route::Simulation,
            vec![
                Delivery::plain(from),
                Delivery {
                    recipient: OBSERVER_ID,
                    simulation: true,
                },
            ],
        ),
        (false, _) => (
            Route::Injected,
            vec![Delivery::plain(to), Delivery::plain(OBSERVER_ID)],
        ),
    };

    let mut deliveries: Vec<Delivery> = Vec::with_capacity(planned.len());
    for delivery in planned {
        if !deliveries.iter().any(|d| d.recipient == delivery.recipient) {
            deliveries.push(delivery);
        }
    }
    (route, deliveries)
}

/// Result of routing one message.
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub convo_id: String,
    pub message: ChatMessage,
    pub route: Route,
    /// Identities whose connection accepted a copy
    pub delivered_to: Vec<ProfileId>,
}

pub struct MessageRouter {
    store: Arc<DocumentStore>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<HubMetrics>,
}

impl MessageRouter {
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

    /// Persist and deliver a message from `from` to `to`.
    ///
    /// If persisting fails nothing is delivered. Copies that cannot be delivered
    /// (recipient offline, connection gone, queue full) are skipped without error
    /// and never hold up the remaining copies.
    pub async fn route(
        &self,
        from: ProfileId,
        to: ProfileId,
        text: String,
    ) -> Result<RoutedMessage, StoreError> {
        // Stamped inside the section so the timestamp is the persistence time
        let (convo_id, message) = self
            .store
            .update("send_message", move |doc| {
                let message = ChatMessage::new(from, to, text);
                (doc.append_message(message.clone()), message)
            })
            .await
            .inspect_err(|e| {
                warn!(from, to, error = %e, "Message not persisted, nothing delivered");
                self.metrics.store_error();
            })?;

        let sender_live = self.registry.is_live(from).await;
        let recipient_live = self.registry.is_live(to).await;
        let (route, deliveries) = plan_deliveries(from, to, sender_live, recipient_live);

        let mut delivered_to = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            let frame = Arc::new(ServerFrame::NewMessage {
                payload: MessageDelivery {
                    convo_id: convo_id.clone(),
                    message: message.clone(),
                    is_simulation: delivery.simulation,
                },
            });
            match self.registry.send(delivery.recipient, frame).await {
                DeliveryOutcome::Delivered => delivered_to.push(delivery.recipient),
                DeliveryOutcome::NotConnected => {
                    debug!(recipient = delivery.recipient, "Recipient offline, copy skipped");
                }
                DeliveryOutcome::QueueFull => {
                    warn!(recipient = delivery.recipient, "Outbound queue full, copy dropped");
                    self.metrics.frame_dropped();
                }
            }
        }

        self.metrics.message_routed(route == Route::Simulation);
        info!(from, to, convo = %convo_id, ?route, delivered = ?delivered_to, "Message routed");

        Ok(RoutedMessage {
            convo_id,
            message,
            route,
            delivered_to,
        })
    }
}
