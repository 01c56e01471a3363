//! API request/response types

use crate::application::DialerError;
use crate::domain::agent::AgentStatus;
use crate::domain::shared::{CampaignId, DomainError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Generic API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignStartResponse {
    pub campaign_id: CampaignId,
    pub leads_queued: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentStatusRequest {
    pub status: AgentStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub campaign_id: Option<CampaignId>,
}

/// Engine errors mapped onto HTTP status codes
#[derive(Debug)]
pub struct ApiError(pub DialerError);

impl From<DialerError> for ApiError {
    fn from(e: DialerError) -> Self {
        Self(e)
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(DialerError::Domain(e))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            DialerError::InvalidEventSignature => StatusCode::FORBIDDEN,
            DialerError::UnknownCorrelationId(_) => StatusCode::OK,
            DialerError::Domain(DomainError::NotFound(_)) => StatusCode::NOT_FOUND,
            DialerError::Domain(DomainError::ValidationError(_)) => StatusCode::BAD_REQUEST,
            DialerError::Domain(DomainError::InvalidStateTransition(_))
            | DialerError::Domain(DomainError::Conflict(_))
            | DialerError::DispatchConflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("API error: {}", self.0);
        } else {
            warn!("API request failed: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError(DialerError::InvalidEventSignature).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(DomainError::NotFound("agent".to_string())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DomainError::InvalidStateTransition("paused".to_string()))
                .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(DomainError::Storage("down".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_envelope_serialization() {
        let json = serde_json::to_value(ApiResponse::success(3)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 3);
        assert!(json["error"].is_null());
    }
}
