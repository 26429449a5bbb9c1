//! Signaling connections: registry, lifecycle, keepalive, and the echo probe.

pub mod connection;
pub mod echo;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
