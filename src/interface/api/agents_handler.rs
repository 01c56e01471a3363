//! Agent presence API handlers

use super::dto::{AgentStatusRequest, ApiError, ApiResponse};
use super::state::AppState;
use crate::domain::agent::Agent;
use crate::domain::shared::AgentId;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

pub async fn set_agent_status(
    State(state): State<AppState>,
    Path(agent_id): Path<AgentId>,
    Json(request): Json<AgentStatusRequest>,
) -> Result<Json<ApiResponse<Agent>>, ApiError> {
    info!(
        "API: Agent {} status -> {}",
        agent_id,
        request.status.as_str()
    );

    let agent = state
        .engine
        .set_agent_status(agent_id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(agent)))
}
