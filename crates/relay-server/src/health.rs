//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::websocket::registry::Occupancy;

/// Whether the relay is admitting peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has begun; new peers are refused.
    Draining,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` or `draining`.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Occupied (session, role) slots.
    pub connections: usize,
    /// Sessions with at least one connected peer.
    pub active_sessions: usize,
    /// Sessions where both the interviewer and the candidate are connected.
    pub paired_sessions: usize,
}

impl HealthResponse {
    /// Report on the relay from a registry snapshot.
    pub fn new(start_time: Instant, occupancy: Occupancy, draining: bool) -> Self {
        Self {
            status: if draining {
                HealthStatus::Draining
            } else {
                HealthStatus::Ok
            },
            uptime_secs: start_time.elapsed().as_secs(),
            connections: occupancy.connections,
            active_sessions: occupancy.sessions,
            paired_sessions: occupancy.paired_sessions,
        }
    }
}
