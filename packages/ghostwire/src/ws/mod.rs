//! Realtime hub over WebSocket
//!
//! - `protocol`: the `{action, payload}` frames in both directions
//! - `registry`: open connections and the identity each is bound to
//! - `router`: persist-then-deliver for chat messages
//! - `notifier`: full-state pushes to every connection

mod handler;
pub mod notifier;
pub mod protocol;
pub mod registry;
pub mod router;

pub use handler::handle_connection;
