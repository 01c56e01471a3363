//! Campaign control API handlers

use super::dto::{ApiError, ApiResponse, CampaignStartResponse};
use super::state::AppState;
use crate::domain::campaign::Campaign;
use crate::domain::shared::CampaignId;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

/// Start (or resume) a campaign and queue its pending leads
pub async fn start_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<ApiResponse<CampaignStartResponse>>, ApiError> {
    info!("API: Starting campaign {}", campaign_id);

    let leads_queued = state.engine.start_campaign(campaign_id).await?;

    Ok(Json(ApiResponse::success(CampaignStartResponse {
        campaign_id,
        leads_queued,
    })))
}

pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<ApiResponse<Campaign>>, ApiError> {
    info!("API: Pausing campaign {}", campaign_id);

    let campaign = state.engine.pause_campaign(campaign_id).await?;
    Ok(Json(ApiResponse::success(campaign)))
}
