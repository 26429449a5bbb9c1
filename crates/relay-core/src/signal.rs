//! Relayed payloads and presence events.
//!
//! The relay treats payloads as opaque. The one rule it applies: a frame
//! that parses as a JSON object and has no `sender` field gets one set to
//! the sending role. Anything else (malformed JSON, JSON arrays or scalars)
//! is forwarded byte-for-byte with no annotation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::role::Role;

/// Field injected into relayed JSON objects.
pub const SENDER_FIELD: &str = "sender";

/// A frame ready to be fanned out to the other roles of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayPayload {
    /// Parsed JSON object, re-serialized with a `sender` field.
    Annotated(String),
    /// Original text, forwarded unmodified.
    Raw(String),
}

impl RelayPayload {
    /// Prepare an incoming text frame from `sender` for relaying.
    pub fn from_frame(raw: &str, sender: Role) -> Self {
        let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(raw) else {
            return Self::Raw(raw.to_owned());
        };
        if !fields.contains_key(SENDER_FIELD) {
            let _ = fields.insert(
                SENDER_FIELD.to_owned(),
                Value::String(sender.as_str().to_owned()),
            );
        }
        Self::Annotated(Value::Object(fields).to_string())
    }

    /// Whether the frame fell back to raw passthrough.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Text to put on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Annotated(s) | Self::Raw(s) => s,
        }
    }

    /// Consume and return the wire text.
    pub fn into_text(self) -> String {
        match self {
            Self::Annotated(s) | Self::Raw(s) => s,
        }
    }
}

/// Presence event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceKind {
    /// A role joined the session.
    UserConnected,
    /// A role left the session.
    UserDisconnected,
}

impl PresenceKind {
    /// Wire value of the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserConnected => "user-connected",
            Self::UserDisconnected => "user-disconnected",
        }
    }
}

/// Synthesized `{type, sender}` message announcing a peer's arrival or departure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: PresenceKind,
    /// Role the event is about.
    pub sender: Role,
}

impl PresenceEvent {
    /// `user-connected` for `role`.
    pub fn connected(role: Role) -> Self {
        Self {
            kind: PresenceKind::UserConnected,
            sender: role,
        }
    }

    /// `user-disconnected` for `role`.
    pub fn disconnected(role: Role) -> Self {
        Self {
            kind: PresenceKind::UserDisconnected,
            sender: role,
        }
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": self.kind.as_str(),
            SENDER_FIELD: self.sender.as_str(),
        })
        .to_string()
    }
}
