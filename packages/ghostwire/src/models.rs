//! Document Model
//!
//! The single shared document (`profiles` + `chats`) and the records stored in it.
//! Everything except the fields the hub itself relies on is kept as opaque JSON so
//! a document survives a load/store cycle unchanged.

use chrono::{Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Numeric identity of a profile. Also the identity a connection binds to.
pub type ProfileId = u64;

/// The privileged observer identity. Receives a mirrored copy of all routed traffic.
pub const OBSERVER_ID: ProfileId = 0;

/// Joins the two participant ids of a conversation key.
pub const CONVERSATION_KEY_SEPARATOR: &str = "--";

/// Newest entries kept in a profile's `activityLog`.
pub const ACTIVITY_LOG_CAP: usize = 500;

/// Deterministic, order-independent key for the conversation between `a` and `b`.
pub fn conversation_key(a: ProfileId, b: ProfileId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}{CONVERSATION_KEY_SEPARATOR}{high}")
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The shared document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub chats: BTreeMap<String, Vec<ChatRecord>>,
    /// Any other top-level keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A profile record. Only `id` is interpreted; all other fields are opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Stored as found. Profiles without a non-negative integer id are kept but
    /// never matched or counted when assigning ids.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub from_id: ProfileId,
    pub to_id: ProfileId,
    pub text: String,
    /// Assigned when the message is persisted, never taken from the client.
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(from_id: ProfileId, to_id: ProfileId, text: impl Into<String>) -> Self {
        Self {
            from_id,
            to_id,
            text: text.into(),
            timestamp: now_timestamp(),
            extra: Map::new(),
        }
    }

    pub fn conversation_key(&self) -> String {
        conversation_key(self.from_id, self.to_id)
    }
}

/// One entry of a conversation. Entries that are not well-formed messages are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatRecord {
    Message(ChatMessage),
    Opaque(Value),
}

impl ChatRecord {
    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Message(message) => Some(message),
            Self::Opaque(_) => None,
        }
    }
}

/// Entry in the system audit log kept on the first profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
}

impl SystemLogEntry {
    pub fn new(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            time: Local::now().format("%H:%M:%S").to_string(),
            kind: kind.into(),
            msg: msg.into(),
        }
    }
}

impl Profile {
    /// A blank citizen profile, the shape new analyst accounts start from.
    pub fn citizen(id: ProfileId, name: &str) -> Self {
        let fields = json!({
            "name": name,
            "type": "citizen",
            "isAnalyst": true,
            "loginUsername": name,
            "settings": { "isPrivate": false },
            "info": {
                "city": "",
                "ethnicity": "",
                "job": "",
                "company": "",
                "risk": "low",
                "club": "",
                "languages": "",
                "rel": "",
                "dob": "",
                "phone": ""
            },
            "friends": [],
            "posts": [],
            "gallery": []
        });
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: Value::from(id),
            fields,
        }
    }

    /// The profile's id, if it is a non-negative integer.
    pub fn id(&self) -> Option<ProfileId> {
        self.id.as_u64()
    }

    #[cfg(test)]
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

impl Document {
    /// Parse a stored document, normalizing it to canonical shape.
    ///
    /// Empty input and `null` yield the empty document; a bare array is a legacy
    /// document holding only profiles.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Normalize an already-decoded JSON value into a document.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(_) => Ok(Self {
                profiles: serde_json::from_value(value)?,
                ..Self::default()
            }),
            Value::Object(_) => serde_json::from_value(value),
            other => Err(serde::de::Error::custom(format!(
                "expected a JSON object, found {other}"
            ))),
        }
    }

    /// Id for the next profile: one past the highest existing id, or 1 when no
    /// profile has one. `None` once the highest id is `ProfileId::MAX`.
    pub fn next_profile_id(&self) -> Option<ProfileId> {
        self.profiles
            .iter()
            .filter_map(Profile::id)
            .max()
            .map_or(Some(1), |max| max.checked_add(1))
    }

    #[cfg(test)]
    pub fn profile(&self, id: ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id() == Some(id))
    }

    pub fn profile_mut(&mut self, id: ProfileId) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id() == Some(id))
    }

    /// Append a message to its conversation, creating the conversation if needed.
    /// Returns the conversation key.
    pub fn append_message(&mut self, message: ChatMessage) -> String {
        let key = message.conversation_key();
        self.chats
            .entry(key.clone())
            .or_default()
            .push(ChatRecord::Message(message));
        key
    }

    pub fn message_count(&self) -> usize {
        self.chats.values().map(Vec::len).sum()
    }

    /// Insert an entry at the front of the system log (`profiles[0].systemData.logs`).
    ///
    /// Only documents whose first profile carries `systemData` have a system log;
    /// returns false when there is nowhere to record the entry.
    pub fn push_system_log(&mut self, entry: SystemLogEntry) -> bool {
        let Some(system) = self
            .profiles
            .first_mut()
            .and_then(|p| p.fields.get_mut("systemData"))
            .and_then(Value::as_object_mut)
        else {
            return false;
        };
        let logs = system
            .entry("logs")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(logs) = logs.as_array_mut() else {
            return false;
        };
        match serde_json::to_value(entry) {
            Ok(value) => {
                logs.insert(0, value);
                true
            }
            Err(_) => false,
        }
    }

    /// Append to a profile's `activityLog`, keeping only the newest
    /// [`ACTIVITY_LOG_CAP`] entries. Returns false for an unknown profile.
    pub fn record_activity(&mut self, id: ProfileId, action: &str, details: Value) -> bool {
        let Some(profile) = self.profile_mut(id) else {
            return false;
        };
        let log = profile
            .fields
            .entry("activityLog")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !log.is_array() {
            *log = Value::Array(Vec::new());
        }
        let Some(log) = log.as_array_mut() else {
            return false;
        };
        log.push(json!({
            "timestamp": now_timestamp(),
            "action": action,
            "details": details,
        }));
        if log.len() > ACTIVITY_LOG_CAP {
            let excess = log.len() - ACTIVITY_LOG_CAP;
            log.drain(..excess);
        }
        true
    }
}
