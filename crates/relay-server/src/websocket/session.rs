//! Signaling connection lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::errors::{GOING_AWAY, REASON_HEARTBEAT_TIMEOUT};
use relay_core::{PresenceEvent, Role, SessionId};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{Span, debug, info, instrument, warn};

use super::connection::PeerConnection;
use super::handler::{Rejection, relay_frame};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::metrics::{
    RELAY_REJECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// How long teardown waits for the writer to flush a close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a signaling connection for an admitted peer.
///
/// 1. Registers the connection, preempting any previous occupant of the slot
/// 2. Announces `user-connected` to the rest of the session
/// 3. Relays every inbound text frame to the other peers
/// 4. On exit, frees the slot and announces `user-disconnected`, unless a
///    newer connection already took the slot over
#[instrument(skip_all, fields(session_id = %session_id, role = %role, conn_id = tracing::field::Empty))]
pub async fn run_signaling_session(
    ws: WebSocket,
    session_id: SessionId,
    role: Role,
    registry: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(config.send_queue_capacity.max(1));
    let connection = Arc::new(PeerConnection::new(session_id.clone(), role, send_tx));
    let _ = Span::current().record("conn_id", connection.id.as_str());

    let keepalive = config.keepalive();
    let outbound = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        connection.clone(),
        keepalive.map(|k| k.interval),
    ));
    let watchdog = keepalive.map(|k| {
        let watched = connection.clone();
        tokio::spawn(async move {
            if run_heartbeat(watched.clone(), k.interval, k.timeout).await
                == HeartbeatResult::TimedOut
            {
                warn!(conn_id = %watched.id, "peer unresponsive, closing");
                let _ = watched.close(GOING_AWAY, REASON_HEARTBEAT_TIMEOUT);
            }
        })
    });

    registry.register(connection.clone());
    let slot = SlotGuard::new(registry.clone(), connection.clone());
    info!("peer connected");

    let notice = PresenceEvent::connected(role).to_json();
    let notified = registry.broadcast(&session_id, role, Arc::from(notice));
    debug!(notified, "announced connect");

    loop {
        let frame = tokio::select! {
            () = connection.closed() => {
                debug!("connection closed by relay");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            None => {
                debug!("transport ended");
                break;
            }
            Some(Err(e)) => {
                info!(error = %e, "transport error");
                break;
            }
            Some(Ok(Message::Text(t))) => t.to_string(),
            // Some clients send signaling JSON as binary frames
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "peer sent close frame");
                break;
            }
        };

        connection.mark_alive();
        let _ = relay_frame(&registry, &session_id, role, &text);
    }

    connection.shutdown();
    drop(slot);

    let abort = outbound.abort_handle();
    if time::timeout(WRITER_DRAIN_TIMEOUT, outbound).await.is_err() {
        debug!("writer did not finish in time, aborting");
        abort.abort();
    }
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
}

/// Drain the outbound queue into the socket until the connection closes.
///
/// Ends with the requested close frame, or a plain close handshake when the
/// connection ended without one.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    connection: Arc<PeerConnection>,
    ping_every: Option<Duration>,
) {
    let mut ping = time::interval(ping_every.unwrap_or(Duration::from_secs(3600)));
    // Skip the immediate first tick
    let _ = ping.tick().await;
    let pinging = ping_every.is_some();

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => break,
            msg = outbound.recv() => {
                let Some(text) = msg else { break };
                if let Err(e) = ws_tx.send(Message::Text(text.to_string().into())).await {
                    debug!(error = %e, "outbound send failed");
                    connection.shutdown();
                    return;
                }
            }
            _ = ping.tick(), if pinging => {
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    connection.shutdown();
                    return;
                }
            }
        }
    }

    match connection.take_close_request() {
        Some(request) => {
            let frame = CloseFrame {
                code: request.code,
                reason: request.reason.into(),
            };
            if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
                debug!(error = %e, "failed to send close frame");
            }
        }
        None => {
            let _ = ws_tx.close().await;
        }
    }
}

/// Refuse a connection after upgrade: close frame only, no registry entry.
pub async fn reject(mut ws: WebSocket, rejection: Rejection) {
    counter!(RELAY_REJECTIONS_TOTAL, "reason" => rejection.kind).increment(1);
    let frame = CloseFrame {
        code: rejection.code,
        reason: rejection.reason.into(),
    };
    if let Err(e) = ws.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "failed to send rejection close frame");
    }
}

/// Owns a connection's slot for the lifetime of its session task.
///
/// Dropping the guard frees the slot if this connection still holds it and
/// tells the remaining peers. A connection that was preempted leaves the
/// slot and the session alone.
struct SlotGuard {
    registry: Arc<ConnectionRegistry>,
    connection: Arc<PeerConnection>,
}

impl SlotGuard {
    fn new(registry: Arc<ConnectionRegistry>, connection: Arc<PeerConnection>) -> Self {
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        Self {
            registry,
            connection,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let conn = &self.connection;
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());

        if self.registry.release(&conn.session_id, conn.role, &conn.id) {
            let notice = PresenceEvent::disconnected(conn.role).to_json();
            let notified = self
                .registry
                .broadcast(&conn.session_id, conn.role, Arc::from(notice));
            info!(notified, dropped = conn.drop_count(), "peer disconnected");
        } else {
            info!("preempted peer disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::logging::capture_logs;
    use tracing::Level;

    fn peer(session: &str, role: Role) -> (Arc<PeerConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(PeerConnection::new(SessionId::from(session), role, tx)), rx)
    }

    #[tokio::test]
    async fn slot_guard_announces_disconnect() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _ra) = peer("9", Role::Interviewer);
        let (b, mut rb) = peer("9", Role::Candidate);
        registry.register(a.clone());
        registry.register(b);

        drop(SlotGuard::new(registry.clone(), a));

        let notice: serde_json::Value =
            serde_json::from_str(&rb.recv().await.unwrap()).unwrap();
        assert_eq!(
            notice,
            serde_json::json!({"type": "user-disconnected", "sender": "interviewer"})
        );
        assert_eq!(registry.roles(&SessionId::from("9")), vec![Role::Candidate]);
    }

    #[test]
    fn preempted_guard_leaves_successor_alone() {
        let (logs, _guard) = capture_logs();
        let registry = Arc::new(ConnectionRegistry::new());
        let (old, _ro) = peer("9", Role::Candidate);
        let (other, mut r_other) = peer("9", Role::Interviewer);
        let (new, _rn) = peer("9", Role::Candidate);
        registry.register(other);
        registry.register(old.clone());
        let guard = SlotGuard::new(registry.clone(), old);
        registry.register(new.clone());

        drop(guard);

        assert_eq!(registry.occupant(&SessionId::from("9"), Role::Candidate).unwrap().id, new.id);
        assert!(r_other.try_recv().is_err());
        assert!(logs.has_event(Level::INFO, "preempted peer disconnected"));
    }

    #[test]
    fn shutdown_teardown_sends_no_presence() {
        let (logs, _guard) = capture_logs();
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _ra) = peer("9", Role::Interviewer);
        let (b, mut rb) = peer("9", Role::Candidate);
        registry.register(a.clone());
        registry.register(b.clone());
        let guard_a = SlotGuard::new(registry.clone(), a);
        let guard_b = SlotGuard::new(registry.clone(), b);

        assert_eq!(registry.close_all(GOING_AWAY, "Server shutting down"), 2);
        drop(guard_a);
        drop(guard_b);

        assert!(rb.try_recv().is_err());
        assert!(!logs.has_event(Level::WARN, "failed to deliver"));
        assert!(!registry.contains_session(&SessionId::from("9")));
    }

    #[test]
    fn last_guard_removes_session() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _ra) = peer("9", Role::Interviewer);
        registry.register(a.clone());
        drop(SlotGuard::new(registry.clone(), a));
        assert!(!registry.contains_session(&SessionId::from("9")));
    }
}
