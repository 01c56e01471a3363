//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the dialer metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        "dialer_calls_launched_total",
        "Lead legs successfully placed with the provider"
    );
    describe_counter!(
        "dialer_calls_rejected_total",
        "Lead legs the provider refused to create"
    );
    describe_counter!(
        "dialer_dispatch_conflicts_total",
        "Queue entries whose lead was already claimed"
    );
    describe_counter!(
        "dialer_transfers_total",
        "Warm-transfer steps by outcome"
    );
    describe_counter!(
        "dialer_retries_scheduled_total",
        "Leads requeued for another attempt"
    );
    describe_counter!(
        "dialer_leads_exhausted_total",
        "Leads that used up their attempts"
    );
    describe_counter!(
        "dialer_events_dropped_total",
        "Provider events logged and dropped, by reason"
    );
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}
