//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup; a second install fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// Signaling connections admitted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Signaling disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active signaling connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Signaling connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Frames relayed to the session total (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Frames relayed verbatim because they were not JSON objects (counter).
pub const RELAY_RAW_MESSAGES_TOTAL: &str = "relay_raw_messages_total";
/// Messages a peer's queue refused (counter).
pub const RELAY_DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Connections replaced by a newer one for the same slot (counter).
pub const RELAY_PREEMPTIONS_TOTAL: &str = "relay_preemptions_total";
/// Connection attempts refused (counter, labels: reason).
pub const RELAY_REJECTIONS_TOTAL: &str = "relay_rejections_total";
