//! Call inspection API handlers

use super::dto::{ApiError, ApiResponse, StatsQuery};
use super::state::AppState;
use crate::application::DialerStats;
use crate::domain::call::Call;
use crate::domain::shared::{CallId, DomainError};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

/// Call statistics, optionally for one campaign
pub async fn get_call_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<DialerStats>>, ApiError> {
    info!("API: Getting call statistics");

    let stats = state.engine.stats(query.campaign_id).await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn get_call(
    State(state): State<AppState>,
    Path(call_id): Path<CallId>,
) -> Result<Json<ApiResponse<Call>>, ApiError> {
    info!("API: Getting call {}", call_id);

    let call = state
        .engine
        .get_call(call_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("call {}", call_id)))?;
    Ok(Json(ApiResponse::success(call)))
}

pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}
