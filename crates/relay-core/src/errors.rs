//! Error types for the signaling relay.
//!
//! [`RelayError`] covers the failures a connection attempt or an active
//! connection can run into. Rejections that happen before registration map
//! onto a WebSocket close code and a human-readable reason via
//! [`RelayError::close_code`] and [`RelayError::close_reason`]; peers never
//! see any other error detail.

use thiserror::Error;

/// Close code for normal shutdown of a connection by the server.
pub const GOING_AWAY: u16 = 1001;
/// Close code used for unknown sessions, invalid roles, and preemption.
pub const POLICY_VIOLATION: u16 = 1008;
/// Close code used when the session lookup itself failed.
pub const INTERNAL_ERROR: u16 = 1011;

/// Close reason sent when the path names a session the store does not know.
pub const REASON_SESSION_NOT_FOUND: &str = "Interview session not found";
/// Close reason sent when the path role is not a known role.
pub const REASON_INVALID_ROLE: &str = "Invalid role";
/// Close reason sent to a connection replaced by a newer one for its slot.
pub const REASON_PREEMPTED: &str = "New connection established for this role";
/// Close reason sent when the session store could not be queried.
pub const REASON_LOOKUP_FAILED: &str = "Session lookup failed";
/// Close reason sent to every connection during graceful shutdown.
pub const REASON_SHUTDOWN: &str = "Server shutting down";
/// Close reason sent when a peer stopped answering keepalive pings.
pub const REASON_HEARTBEAT_TIMEOUT: &str = "Heartbeat timeout";

/// Convenience alias.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Relay failure.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The session validator reported no such interview session.
    #[error("interview session not found")]
    SessionNotFound,

    /// The path role is not one of the known roles.
    #[error("invalid role: {0:?}")]
    InvalidRole(String),

    /// The session validator could not answer.
    #[error("session lookup failed: {0}")]
    Validator(String),

    /// Send or receive failure on a live transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A close was requested on a connection that is already closing.
    #[error("connection already closed")]
    AlreadyClosed,
}

impl RelayError {
    /// WebSocket close code to send when this error refuses a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::SessionNotFound | Self::InvalidRole(_) => POLICY_VIOLATION,
            Self::Validator(_) | Self::Transport(_) | Self::AlreadyClosed => INTERNAL_ERROR,
        }
    }

    /// Reason string paired with [`close_code`](Self::close_code).
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::SessionNotFound => REASON_SESSION_NOT_FOUND,
            Self::InvalidRole(_) => REASON_INVALID_ROLE,
            Self::Validator(_) | Self::Transport(_) | Self::AlreadyClosed => REASON_LOOKUP_FAILED,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "session_not_found",
            Self::InvalidRole(_) => "invalid_role",
            Self::Validator(_) => "validator",
            Self::Transport(_) => "transport",
            Self::AlreadyClosed => "already_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_are_policy_violations() {
        assert_eq!(RelayError::SessionNotFound.close_code(), 1008);
        assert_eq!(RelayError::InvalidRole("x".into()).close_code(), 1008);
    }

    #[test]
    fn close_reasons_match_wire_contract() {
        assert_eq!(
            RelayError::SessionNotFound.close_reason(),
            "Interview session not found"
        );
        assert_eq!(RelayError::InvalidRole("admin".into()).close_reason(), "Invalid role");
        assert_eq!(REASON_PREEMPTED, "New connection established for this role");
    }

    #[test]
    fn lookup_failure_is_internal_error() {
        let err = RelayError::Validator("database is locked".into());
        assert_eq!(err.close_code(), INTERNAL_ERROR);
        assert_eq!(err.close_reason(), REASON_LOOKUP_FAILED);
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn display_includes_role() {
        let err = RelayError::InvalidRole("observer".into());
        assert_eq!(err.to_string(), "invalid role: \"observer\"");
    }

    #[test]
    fn kinds_are_snake_case() {
        let errs = [
            RelayError::SessionNotFound,
            RelayError::InvalidRole(String::new()),
            RelayError::Validator(String::new()),
            RelayError::Transport(String::new()),
            RelayError::AlreadyClosed,
        ];
        for err in errs {
            assert!(err.kind().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
