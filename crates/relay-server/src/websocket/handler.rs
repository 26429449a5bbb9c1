//! Admission checks and frame dispatch for signaling connections.

use std::sync::Arc;

use metrics::counter;
use relay_core::errors::{GOING_AWAY, REASON_SHUTDOWN};
use relay_core::{RelayError, RelayPayload, Role, SessionId};
use tracing::{debug, trace};

use super::registry::ConnectionRegistry;
use crate::metrics::{RELAY_MESSAGES_TOTAL, RELAY_RAW_MESSAGES_TOTAL};
use crate::validator::SessionValidator;

/// Close frame sent to a peer refused before registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason.
    pub reason: &'static str,
    /// Metric label.
    pub kind: &'static str,
}

impl Rejection {
    /// Refusal for connections arriving during shutdown.
    pub fn shutting_down() -> Self {
        Self {
            code: GOING_AWAY,
            reason: REASON_SHUTDOWN,
            kind: "shutting_down",
        }
    }
}

impl From<&RelayError> for Rejection {
    fn from(err: &RelayError) -> Self {
        Self {
            code: err.close_code(),
            reason: err.close_reason(),
            kind: err.kind(),
        }
    }
}

/// Decide whether a peer may join `session_id` as `role`.
///
/// The session is checked first, so a request naming both an unknown
/// session and an invalid role is refused for the session.
pub async fn admit(
    validator: &dyn SessionValidator,
    session_id: &SessionId,
    role: &str,
) -> Result<Role, RelayError> {
    if !validator.session_exists(session_id).await? {
        return Err(RelayError::SessionNotFound);
    }
    role.parse::<Role>()
}

/// Relay one inbound text frame from `sender` to the rest of its session.
///
/// JSON objects get a `sender` field when they lack one; anything else is
/// forwarded verbatim. Returns how many peers accepted the message.
pub fn relay_frame(
    registry: &ConnectionRegistry,
    session_id: &SessionId,
    sender: Role,
    frame: &str,
) -> usize {
    let payload = RelayPayload::from_frame(frame, sender);
    counter!(RELAY_MESSAGES_TOTAL).increment(1);
    if payload.is_raw() {
        counter!(RELAY_RAW_MESSAGES_TOTAL).increment(1);
        debug!(len = frame.len(), "frame is not a JSON object, relaying verbatim");
    }
    let delivered = registry.broadcast(session_id, sender, Arc::from(payload.into_text()));
    trace!(delivered, "frame relayed");
    delivered
}
