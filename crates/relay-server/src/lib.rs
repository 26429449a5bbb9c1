//! # relay-server
//!
//! Axum WebSocket signaling relay for interview sessions.
//!
//! - Signaling endpoint `/ws/interview/{session_id}/{role}`: admission
//!   against the interview-record store, one live connection per
//!   (session, role) slot, sender-annotated fan-out, presence notices
//! - `/ws/test` echo probe, `/health`, and Prometheus `/metrics`
//! - Optional keepalive pings with unresponsive-peer eviction
//! - Graceful shutdown via `CancellationToken` + task tracking

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod validator;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RelayServer;
pub use validator::{SessionValidator, SqliteSessionValidator, StaticSessionValidator};
pub use websocket::registry::ConnectionRegistry;
