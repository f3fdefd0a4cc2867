//! WebSocket Handler
//!
//! One task set per connection: a writer draining the outbound queue into the
//! socket, and a reader applying inbound frames to the hub in arrival order.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::hub::Hub;
use crate::metrics::HubMetrics;

use super::protocol::{ClientFrame, Outbound};

/// Handle one client connection until either side closes it.
pub async fn handle_connection(
    socket: WebSocket,
    hub: Arc<Hub>,
    metrics: Arc<HubMetrics>,
    send_channel_capacity: usize,
) {
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending frames to the WebSocket
    let (tx, mut rx) = mpsc::channel::<Outbound>(send_channel_capacity.max(1));
    let connection_id = hub.connect(tx).await;
    info!(conn_id = %connection_id, "New WebSocket connection");

    // Task to send frames to the WebSocket
    let metrics_out = metrics.clone();
    let sender_task = async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(frame.as_ref()) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            metrics_out.frame_sent();
        }
    };

    // Task to handle incoming frames, one at a time
    let hub_in = hub.clone();
    let metrics_in = metrics.clone();
    let conn_in = connection_id.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(conn_id = %conn_in, "WebSocket receive error: {}", e);
                    break;
                }
            };
            metrics_in.frame_received();

            let frame = match ClientFrame::parse(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(conn_id = %conn_in, "Ignoring frame: {}", e);
                    continue;
                }
            };

            match frame {
                ClientFrame::Identify { profile_id } => {
                    if let Err(e) = hub_in.identify(&conn_in, &profile_id).await {
                        warn!(conn_id = %conn_in, code = e.error_code(), "Identify rejected: {}", e);
                    }
                }
                ClientFrame::SyncDb { document } => {
                    if let Err(e) = hub_in.replace_document(document).await {
                        error!(conn_id = %conn_in, code = e.error_code(), "syncDB failed: {}", e);
                    }
                }
                ClientFrame::SendMessage {
                    from_id,
                    to_id,
                    text,
                } => {
                    match hub_in.send_message(from_id, to_id, text).await {
                        Ok(routed) => debug!(
                            conn_id = %conn_in,
                            convo = %routed.convo_id,
                            route = ?routed.route,
                            delivered = ?routed.delivered_to,
                            sent_at = %routed.message.timestamp,
                            "sendMessage handled"
                        ),
                        Err(e) => error!(
                            conn_id = %conn_in,
                            from_id,
                            to_id,
                            code = e.error_code(),
                            "sendMessage failed: {}",
                            e
                        ),
                    }
                }
            }
        }
    };

    // Run until either side finishes
    tokio::select! {
        _ = sender_task => {},
        _ = input_task => {},
    }

    hub.disconnect(&connection_id).await;
    metrics.connection_closed();
    info!(conn_id = %connection_id, "WebSocket connection closed");
}
