//! Graceful shutdown coordination via `CancellationToken`.

use std::future::Future;
use std::time::Duration;

use relay_core::errors::{GOING_AWAY, REASON_SHUTDOWN};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown of the listener and every connection task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    connections: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Track a connection task so shutdown can wait for it.
    pub fn track<F>(&self, task: F) -> impl Future<Output = F::Output> + Send + use<F>
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        self.connections.track_future(task)
    }

    /// Number of connection tasks still running.
    pub fn tracked_connections(&self) -> usize {
        self.connections.len()
    }

    /// Perform a graceful shutdown.
    ///
    /// 1. Cancel the shutdown token (stops accepting)
    /// 2. Ask every registered connection to close with `1001`
    /// 3. Wait up to `timeout` for connection tasks and `handles` to finish
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let closing = registry.close_all(GOING_AWAY, REASON_SHUTDOWN);
        let _ = self.connections.close();
        info!(
            closing,
            task_count = handles.len(),
            connection_tasks = self.connections.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = async {
            self.connections.wait().await;
            let _ = futures::future::join_all(handles).await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use relay_core::{Role, SessionId};
    use tokio::sync::mpsc;

    use crate::websocket::connection::PeerConnection;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_registered_connections() {
        let coord = ShutdownCoordinator::new();
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(PeerConnection::new(SessionId::from("1"), Role::Candidate, tx));
        registry.register(conn.clone());

        coord.graceful_shutdown(&registry, Vec::new(), None).await;

        let request = conn.take_close_request().unwrap();
        assert_eq!(request.code, 1001);
        assert_eq!(request.reason, "Server shutting down");
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let task = tokio::spawn(coord.track(async move { token.cancelled().await }));
        assert_eq!(coord.tracked_connections(), 1);

        coord
            .graceful_shutdown(&ConnectionRegistry::new(), Vec::new(), None)
            .await;
        assert_eq!(coord.tracked_connections(), 0);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(
                &ConnectionRegistry::new(),
                vec![handle],
                Some(Duration::from_millis(100)),
            )
            .await;
        assert!(coord.is_shutting_down());
    }
}
