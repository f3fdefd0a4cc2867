use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Realtime connection: identify, syncDB and sendMessage in, dbPush and newMessage out
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    let metrics = state.metrics.clone();
    let capacity = state.server_config.websocket.send_channel_capacity;

    ws.on_upgrade(move |socket| ws::handle_connection(socket, hub, metrics, capacity))
}
