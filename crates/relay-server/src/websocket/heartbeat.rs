//! Keepalive liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::connection::PeerConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped responding within the timeout window.
    TimedOut,
    /// The connection closed first.
    Closed,
}

/// Watch a connection's liveness until it times out or closes.
///
/// At each `interval` tick the alive flag is checked and reset. Any frame
/// from the peer marks it alive again. After `timeout / interval`
/// consecutive silent ticks (at least one) the peer is considered dead.
pub async fn run_heartbeat(
    connection: Arc<PeerConnection>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    let mut missed: u32 = 0;
    let max_missed = max_missed(interval, timeout);

    loop {
        tokio::select! {
            () = connection.closed() => return HeartbeatResult::Closed,
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
        }
    }
}

fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}
