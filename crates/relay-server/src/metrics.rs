//! Prometheus metrics recorder and `/metrics` endpoint rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render `/metrics`. Call once at
/// startup, before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections rejected at upgrade for missing identity (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Connections force-closed because the same user reconnected (counter).
pub const HUB_SUPERSEDED_TOTAL: &str = "hub_superseded_total";
/// Messages routed by the hub (counter, labels: kind).
pub const HUB_MESSAGES_ROUTED_TOTAL: &str = "hub_messages_routed_total";
/// Payloads enqueued to client connections (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Payloads dropped on a full or closed queue (counter).
pub const HUB_DROPS_TOTAL: &str = "hub_drops_total";
/// Clients evicted after a drop (counter).
pub const HUB_EVICTIONS_TOTAL: &str = "hub_evictions_total";
/// Registered clients (gauge).
pub const HUB_CLIENTS: &str = "hub_clients";
/// Messages that failed to decode (counter, labels: origin, kind).
pub const DECODE_ERRORS_TOTAL: &str = "decode_errors_total";
/// Records received from the bus (counter, labels: topic).
pub const BUS_RECORDS_TOTAL: &str = "bus_records_total";
/// Bus receive errors (counter, labels: topic, severity).
pub const BUS_ERRORS_TOTAL: &str = "bus_errors_total";
