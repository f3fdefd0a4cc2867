//! WebSocket Protocol Types
//!
//! Every frame in either direction is an `{action, payload}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::HubError;
use crate::models::{ChatMessage, Document, ProfileId};

/// Frames are shared between recipients rather than cloned per connection.
pub type Outbound = Arc<ServerFrame>;

/// Messages sent FROM the server TO clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Full document plus the identities currently connected
    #[serde(rename_all = "camelCase")]
    DbPush {
        payload: Document,
        connected_clients: Vec<ProfileId>,
    },
    /// A routed chat message
    NewMessage { payload: MessageDelivery },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelivery {
    pub convo_id: String,
    pub message: ChatMessage,
    /// Set only on the observer's copy of a message whose recipient is offline
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_simulation: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Raw inbound envelope, before the action is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    payload: Value,
}

/// Messages sent FROM clients TO the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Bind this connection to a profile id. Kept raw so invalid ids can be reported.
    Identify { profile_id: Value },
    /// Replace the whole document
    SyncDb { document: Document },
    SendMessage {
        from_id: ProfileId,
        to_id: ProfileId,
        text: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyPayload {
    #[serde(default)]
    profile_id: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    from_id: ProfileId,
    to_id: ProfileId,
    #[serde(default)]
    text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid payload for {action}: {source}")]
    InvalidPayload {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(FrameError::Malformed)?;
        match envelope.action.as_str() {
            "identify" => {
                let p: IdentifyPayload = decode("identify", envelope.payload)?;
                Ok(Self::Identify {
                    profile_id: p.profile_id,
                })
            }
            "syncDB" => {
                let document = Document::from_value(envelope.payload).map_err(|source| {
                    FrameError::InvalidPayload {
                        action: "syncDB",
                        source,
                    }
                })?;
                Ok(Self::SyncDb { document })
            }
            "sendMessage" => {
                let p: SendMessagePayload = decode("sendMessage", envelope.payload)?;
                Ok(Self::SendMessage {
                    from_id: p.from_id,
                    to_id: p.to_id,
                    text: p.text,
                })
            }
            _ => Err(FrameError::UnknownAction(envelope.action)),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    action: &'static str,
    payload: Value,
) -> Result<T, FrameError> {
    serde_json::from_value(payload).map_err(|source| FrameError::InvalidPayload { action, source })
}

/// Interpret the `profileId` of an identify frame.
///
/// Accepts a JSON integer or a string holding one; rejects anything missing,
/// fractional, negative or non-numeric.
pub fn parse_profile_id(raw: &Value) -> Result<ProfileId, HubError> {
    let parsed = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<ProfileId>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| HubError::InvalidIdentity(raw.to_string()))
}
