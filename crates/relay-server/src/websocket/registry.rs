//! Live connection registry: one occupant per (session, role) slot.
//!
//! All slot state lives behind a single lock. Operations that touch sockets
//! only hand messages to per-connection queues, so nothing here waits on a
//! peer while holding the lock.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use relay_core::errors::{POLICY_VIOLATION, REASON_PREEMPTED};
use relay_core::{RelayError, Role, SessionId};
use tracing::{debug, info, warn};

use super::connection::PeerConnection;
use crate::metrics::{RELAY_DELIVERY_FAILURES_TOTAL, RELAY_PREEMPTIONS_TOTAL};

type RoleSlots = HashMap<Role, Arc<PeerConnection>>;

/// Tracks the live connection for each (session, role) slot.
///
/// A session entry exists only while at least one of its roles is occupied.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<SessionId, RoleSlots>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` the occupant of its (session, role) slot.
    ///
    /// A previous occupant is asked to close with a policy-violation frame
    /// before the new one takes the slot. Its own teardown will find the slot
    /// taken over and leave it alone.
    pub fn register(&self, connection: Arc<PeerConnection>) {
        let session_id = connection.session_id.clone();
        let role = connection.role;
        let conn_id = connection.id.clone();

        let preempted = {
            let mut sessions = self.sessions.lock();
            let slots = sessions.entry(session_id.clone()).or_default();
            let preempted = slots.remove(&role).map(|old| {
                let outcome = old.close(POLICY_VIOLATION, REASON_PREEMPTED);
                (old.id.clone(), outcome)
            });
            let _ = slots.insert(role, connection);
            preempted
        };

        match preempted {
            None => debug!(session_id = %session_id, %role, conn_id, "slot registered"),
            Some((old_id, outcome)) => {
                counter!(RELAY_PREEMPTIONS_TOTAL).increment(1);
                match outcome {
                    Ok(()) => info!(
                        session_id = %session_id,
                        %role,
                        conn_id,
                        preempted = old_id,
                        "replaced existing connection for slot"
                    ),
                    Err(RelayError::AlreadyClosed) => debug!(
                        session_id = %session_id,
                        %role,
                        conn_id,
                        preempted = old_id,
                        "replaced connection that was already closing"
                    ),
                    Err(e) => warn!(
                        session_id = %session_id,
                        %role,
                        preempted = old_id,
                        error = %e,
                        "failed to close preempted connection"
                    ),
                }
            }
        }
    }

    /// Remove whatever occupies the slot. Returns whether anything was removed.
    pub fn unregister(&self, session_id: &SessionId, role: Role) -> bool {
        self.remove_if(session_id, role, |_| true)
    }

    /// Remove the slot only if `conn_id` still occupies it.
    ///
    /// Used by a connection tearing itself down, so a preempted connection
    /// never evicts its successor.
    pub fn release(&self, session_id: &SessionId, role: Role, conn_id: &str) -> bool {
        self.remove_if(session_id, role, |occupant| occupant.id == conn_id)
    }

    fn remove_if(
        &self,
        session_id: &SessionId,
        role: Role,
        matches: impl FnOnce(&PeerConnection) -> bool,
    ) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(slots) = sessions.get_mut(session_id) else {
            return false;
        };
        let owned = slots.get(&role).is_some_and(|occupant| matches(&**occupant));
        let removed = owned && slots.remove(&role).is_some();
        if slots.is_empty() {
            let _ = sessions.remove(session_id);
        }
        drop(sessions);
        if removed {
            debug!(session_id = %session_id, %role, "slot released");
        }
        removed
    }

    /// Deliver a message to one slot's occupant.
    ///
    /// Returns `false` when the slot is empty or the occupant refused the
    /// message. Failures are logged, never raised.
    pub fn send_direct(&self, session_id: &SessionId, role: Role, message: Arc<str>) -> bool {
        match self.occupant(session_id, role) {
            Some(conn) => deliver(&conn, message),
            None => {
                debug!(session_id = %session_id, %role, "no occupant for direct send");
                false
            }
        }
    }

    /// Deliver a message to every occupant of the session except `excluding`.
    ///
    /// Returns how many occupants accepted the message. A failure for one
    /// recipient does not affect the others. Occupants already closing are
    /// skipped without counting as failures.
    pub fn broadcast(&self, session_id: &SessionId, excluding: Role, message: Arc<str>) -> usize {
        let recipients: Vec<Arc<PeerConnection>> = {
            let sessions = self.sessions.lock();
            sessions
                .get(session_id)
                .map(|slots| {
                    slots
                        .iter()
                        .filter(|(role, conn)| **role != excluding && !conn.is_closed())
                        .map(|(_, conn)| conn.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        let delivered = recipients
            .iter()
            .filter(|conn| deliver(conn, message.clone()))
            .count();
        debug!(
            session_id = %session_id,
            excluding = %excluding,
            recipients = recipients.len(),
            delivered,
            "broadcast to session"
        );
        delivered
    }

    /// Ask every live connection to close. Returns how many accepted.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let all: Vec<Arc<PeerConnection>> = {
            let sessions = self.sessions.lock();
            sessions
                .values()
                .flat_map(|slots| slots.values().cloned())
                .collect()
        };
        let closed = all
            .iter()
            .filter(|conn| conn.close(code, reason).is_ok())
            .count();
        info!(total = all.len(), closed, code, reason, "closing all connections");
        closed
    }

    /// Current occupant of a slot.
    pub fn occupant(&self, session_id: &SessionId, role: Role) -> Option<Arc<PeerConnection>> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|slots| slots.get(&role))
            .cloned()
    }

    /// Occupied roles of a session, in [`Role::ALL`] order.
    pub fn roles(&self, session_id: &SessionId) -> Vec<Role> {
        let sessions = self.sessions.lock();
        let Some(slots) = sessions.get(session_id) else {
            return Vec::new();
        };
        Role::ALL
            .iter()
            .copied()
            .filter(|role| slots.contains_key(role))
            .collect()
    }

    /// Whether the session has any occupied slot.
    pub fn contains_session(&self, session_id: &SessionId) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Number of sessions with at least one occupant.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Number of occupied slots across all sessions.
    pub fn connection_count(&self) -> usize {
        self.sessions.lock().values().map(HashMap::len).sum()
    }

    /// Session, slot and pairing counts taken under one lock.
    pub fn occupancy(&self) -> Occupancy {
        let sessions = self.sessions.lock();
        let mut occupancy = Occupancy {
            sessions: sessions.len(),
            ..Occupancy::default()
        };
        for slots in sessions.values() {
            occupancy.connections += slots.len();
            if slots.len() == Role::ALL.len() {
                occupancy.paired_sessions += 1;
            }
        }
        occupancy
    }
}

/// Point-in-time registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    /// Sessions with at least one occupant.
    pub sessions: usize,
    /// Occupied slots.
    pub connections: usize,
    /// Sessions with every role present.
    pub paired_sessions: usize,
}

fn deliver(conn: &PeerConnection, message: Arc<str>) -> bool {
    match conn.send(message) {
        Ok(()) => true,
        Err(e) => {
            counter!(RELAY_DELIVERY_FAILURES_TOTAL).increment(1);
            warn!(
                conn_id = %conn.id,
                session_id = %conn.session_id,
                role = %conn.role,
                dropped = conn.drop_count(),
                error = %e,
                "failed to deliver message to peer"
            );
            false
        }
    }
}
