//! API Router configuration

use super::agents_handler::set_agent_status;
use super::calls_handler::{get_call, get_call_stats, health_check};
use super::campaigns_handler::{pause_campaign, start_campaign};
use super::metrics_handler::metrics_handler;
use super::state::AppState;
use super::webhooks::{
    agent_accept_webhook, agent_answer_webhook, agent_status_webhook, amd_webhook,
    conference_status_webhook, recording_webhook, status_webhook,
};
use super::websocket::websocket_handler;
use crate::infrastructure::telephony::webhook_paths;
use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    // Provider callbacks
    let webhook_routes = Router::new()
        .route(webhook_paths::STATUS, post(status_webhook))
        .route(webhook_paths::AMD, post(amd_webhook))
        .route(webhook_paths::RECORDING, post(recording_webhook))
        .route(webhook_paths::AGENT_ANSWER, post(agent_answer_webhook))
        .route(webhook_paths::AGENT_ACCEPT, post(agent_accept_webhook))
        .route(webhook_paths::AGENT_STATUS, post(agent_status_webhook))
        .route(webhook_paths::CONFERENCE_STATUS, post(conference_status_webhook));

    let campaign_routes = Router::new()
        .route("/api/campaigns/:id/start", post(start_campaign))
        .route("/api/campaigns/:id/pause", post(pause_campaign));

    let agent_routes = Router::new().route("/api/agents/:id/status", put(set_agent_status));

    let call_routes = Router::new()
        .route("/api/calls/stats", get(get_call_stats))
        .route("/api/calls/:id", get(get_call));

    let ws_routes = Router::new().route("/ws", get(websocket_handler));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .merge(campaign_routes)
        .merge(agent_routes)
        .merge(call_routes)
        .merge(ws_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
