//! Prometheus metrics recorder and `/metrics` endpoint support.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded; a second install fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Used where a handle is needed but the process already has (or must not
/// get) a global recorder, such as tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format from the recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: endpoint).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: endpoint).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// WebSocket connection lifetime seconds (histogram, labels: endpoint).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused because the connection cap was reached (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Registered chat connections (gauge).
pub const CHAT_CONNECTIONS_ACTIVE: &str = "chat_connections_active";
/// Chat messages broadcast (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Successful per-recipient deliveries (counter).
pub const RELAY_DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Failed per-recipient deliveries (counter).
pub const RELAY_DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Feed payloads sent (counter).
pub const FEED_PAYLOADS_TOTAL: &str = "feed_payloads_total";
/// Connected feed clients (gauge).
pub const FEED_CONNECTIONS_ACTIVE: &str = "feed_connections_active";
