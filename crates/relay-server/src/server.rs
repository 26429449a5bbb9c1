//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{RelayError, SessionId};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::HealthResponse;
use crate::shutdown::ShutdownCoordinator;
use crate::validator::SessionValidator;
use crate::websocket::echo::run_echo;
use crate::websocket::handler::{Rejection, admit};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{reject, run_signaling_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections by (session, role).
    pub registry: Arc<ConnectionRegistry>,
    /// Session existence checks.
    pub validator: Arc<dyn SessionValidator>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The signaling relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    validator: Arc<dyn SessionValidator>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, validator: Arc<dyn SessionValidator>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            validator,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            validator: self.validator.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws/interview/{session_id}/{role}", get(interview_ws_handler))
            .route("/ws/test", get(echo_ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "signaling relay listening");
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Close every connection with `1001` and wait for tasks to finish.
    pub async fn shutdown_gracefully(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown
            .graceful_shutdown(&self.registry, handles, Some(self.config.shutdown_timeout()))
            .await;
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws/interview/{session_id}/{role}
///
/// Admission runs before the upgrade; refused peers still get the upgrade so
/// the refusal can be delivered as a close frame.
async fn interview_ws_handler(
    ws: WebSocketUpgrade,
    Path((session_id, role)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let session_id = SessionId::from(session_id);
    let admission = if state.shutdown.is_shutting_down() {
        Err(Rejection::shutting_down())
    } else {
        admit(state.validator.as_ref(), &session_id, &role)
            .await
            .map_err(|e| {
                log_refusal(&session_id, &role, &e);
                Rejection::from(&e)
            })
    };

    let AppState {
        registry,
        config,
        shutdown,
        ..
    } = state;
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track(async move {
                match admission {
                    Ok(role) => {
                        run_signaling_session(socket, session_id, role, registry, config).await;
                    }
                    Err(rejection) => reject(socket, rejection).await,
                }
            })
        })
}

fn log_refusal(session_id: &SessionId, role: &str, err: &RelayError) {
    match err {
        RelayError::Validator(_) => {
            error!(session_id = %session_id, role, error = %err, "session lookup failed");
        }
        _ => warn!(session_id = %session_id, role, error = %err, "connection refused"),
    }
}

/// GET /ws/test
async fn echo_ws_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(run_echo)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.start_time,
        state.registry.occupancy(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use crate::validator::StaticSessionValidator;

    fn make_server() -> RelayServer {
        RelayServer::new(
            ServerConfig::default(),
            Arc::new(StaticSessionValidator::new(["1"])),
        )
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_body(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["active_sessions"], 0);
        assert_eq!(parsed["paired_sessions"], 0);
        assert!(parsed.get("uptime_secs").is_some());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let (status, _) = get_body(make_server().router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let (status, _) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn signaling_route_requires_upgrade() {
        let (status, _) = get_body(make_server().router(), "/ws/interview/1/candidate").await;
        assert!(status.is_client_error());
        assert_ne!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get_body(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_with_custom_config() {
        let config = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9090,
            ..ServerConfig::default()
        };
        let server = RelayServer::new(config, Arc::new(StaticSessionValidator::default()));
        assert_eq!(server.config().bind_addr(), "0.0.0.0:9090");
        assert_eq!(server.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_propagates_to_coordinator() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown_gracefully(Vec::new()).await;
        assert!(server.shutdown().is_shutting_down());
    }
}
