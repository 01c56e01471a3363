//! Provider webhook handlers
//!
//! Every callback is authenticated against the exact public URL and form
//! body before it reaches the engine. Event callbacks answer with an empty
//! instruction document; agent answer and accept callbacks answer with the
//! instructions the engine returns.

use super::dto::ApiError;
use super::state::AppState;
use crate::application::DialerError;
use crate::domain::telephony::CallInstruction;
use crate::infrastructure::telephony::callbacks::{self, CallbackForm, CallbackQuery};
use crate::infrastructure::telephony::twilio::SIGNATURE_HEADER;
use axum::{
    extract::{OriginalUri, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

fn authenticate(
    state: &AppState,
    uri: &OriginalUri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<CallbackForm, ApiError> {
    let form = CallbackForm::parse(body)?;
    let path_and_query = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.0.path());
    let url = state.public_url(path_and_query);
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if !state
        .engine
        .provider()
        .validate_inbound_event(&url, form.params(), signature)
    {
        let error = DialerError::InvalidEventSignature;
        if let Some(reason) = error.drop_reason() {
            counter!("dialer_events_dropped_total", "reason" => reason).increment(1);
        }
        warn!("Rejected webhook with bad signature: {}", url);
        return Err(error.into());
    }
    Ok(form)
}

fn instructions(state: &AppState, instructions: &[CallInstruction]) -> Response {
    let rendered = state.engine.provider().render(instructions);
    ([(header::CONTENT_TYPE, rendered.content_type)], rendered.body).into_response()
}

fn acknowledge(state: &AppState) -> Response {
    instructions(state, &[])
}

pub async fn status_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form = authenticate(&state, &uri, &headers, &body)?;
    let event = callbacks::parse_status(&query, &form)?;
    debug!(
        "Status webhook: {} is {}",
        event.provider_call_id,
        event.status.as_str()
    );
    state.engine.handle_status(event).await?;
    Ok(acknowledge(&state))
}

pub async fn amd_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form = authenticate(&state, &uri, &headers, &body)?;
    let event = callbacks::parse_answer_detection(&query, &form)?;
    debug!(
        "AMD webhook: {} answered by {}",
        event.provider_call_id,
        event.answered_by.as_str()
    );
    state.engine.handle_answer_detection(event).await?;
    Ok(acknowledge(&state))
}

pub async fn recording_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form = authenticate(&state, &uri, &headers, &body)?;
    if let Some(event) = callbacks::parse_recording(&query, &form)? {
        state.engine.handle_recording(event).await?;
    }
    Ok(acknowledge(&state))
}

pub async fn agent_answer_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    authenticate(&state, &uri, &headers, &body)?;
    let (call_id, agent_id) = callbacks::parse_agent_ids(&query)?;
    let steps = state.engine.agent_answered(call_id, agent_id).await?;
    Ok(instructions(&state, &steps))
}

pub async fn agent_accept_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    authenticate(&state, &uri, &headers, &body)?;
    let (call_id, agent_id) = callbacks::parse_agent_ids(&query)?;
    let steps = state.engine.agent_accepted(call_id, agent_id).await?;
    Ok(instructions(&state, &steps))
}

pub async fn agent_status_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form = authenticate(&state, &uri, &headers, &body)?;
    let event = callbacks::parse_agent_status(&query, &form)?;
    state.engine.handle_agent_leg_status(event).await?;
    Ok(acknowledge(&state))
}

pub async fn conference_status_webhook(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form = authenticate(&state, &uri, &headers, &body)?;
    if let Some(event) = callbacks::parse_conference(&query, &form)? {
        state.engine.handle_conference_event(event).await?;
    }
    Ok(acknowledge(&state))
}
