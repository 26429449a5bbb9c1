//! Live peer connection state.
//!
//! A [`PeerConnection`] is the registry's handle on one WebSocket. Outbound
//! text goes through a bounded queue drained by the connection's writer
//! task, so handing a message to a peer never waits on that peer's socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{RelayError, Role, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Why a message could not be handed to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The peer's outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,
    /// The peer is closing or its writer has exited.
    #[error("connection closed")]
    Closed,
}

/// Close frame requested for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// A connected interviewer or candidate.
pub struct PeerConnection {
    /// Unique connection ID.
    pub id: String,
    /// Session this connection belongs to.
    pub session_id: SessionId,
    /// Role this connection occupies.
    pub role: Role,
    tx: mpsc::Sender<Arc<str>>,
    close_request: Mutex<Option<CloseRequest>>,
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    dropped_messages: AtomicU64,
}

impl PeerConnection {
    /// Create a connection whose outbound text is delivered to `tx`.
    pub fn new(session_id: SessionId, role: Role, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: format!("conn_{}", Uuid::now_v7()),
            session_id,
            role,
            tx,
            close_request: Mutex::new(None),
            cancel: CancellationToken::new(),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text message for the peer without waiting.
    ///
    /// Messages to a closing connection are refused. Every refusal bumps the
    /// dropped message counter.
    pub fn send(&self, message: Arc<str>) -> Result<(), DeliveryError> {
        let result = if self.cancel.is_cancelled() {
            Err(DeliveryError::Closed)
        } else {
            self.tx.try_send(message).map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::QueueFull,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
        };
        if result.is_err() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Ask the writer to send a close frame and end the connection.
    ///
    /// Only the first request wins; later calls, or calls after the
    /// connection has already ended, return [`RelayError::AlreadyClosed`].
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), RelayError> {
        let mut request = self.close_request.lock();
        if request.is_some() || self.cancel.is_cancelled() {
            return Err(RelayError::AlreadyClosed);
        }
        *request = Some(CloseRequest {
            code,
            reason: reason.into(),
        });
        drop(request);
        self.cancel.cancel();
        Ok(())
    }

    /// End the connection without a close frame of our own.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Take the pending close request, if any.
    pub fn take_close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().take()
    }

    /// Whether the connection has been closed or shut down.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is closed or shut down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Mark the connection as alive (pong or any other frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
