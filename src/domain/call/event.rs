//! Provider callback events, normalised
//!
//! Every event carries our `call_id` (passed to the provider when the call
//! was placed) and, where the provider supplies one, its own call id.

use crate::domain::call::value_object::{AnsweredBy, CallStatus};
use crate::domain::conference::ConferenceEventKind;
use crate::domain::shared::{AgentId, CallId, ProviderCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lead-leg status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub call_id: Option<CallId>,
    pub provider_call_id: ProviderCallId,
    pub status: CallStatus,
    pub duration_seconds: Option<i64>,
}

/// Answering-machine detection result for the lead leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerDetectionEvent {
    pub call_id: Option<CallId>,
    pub provider_call_id: ProviderCallId,
    pub answered_by: AnsweredBy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEvent {
    pub call_id: Option<CallId>,
    /// Absent for conference recordings
    pub provider_call_id: Option<ProviderCallId>,
    pub recording_id: String,
    pub recording_url: String,
    pub duration_seconds: i64,
}

/// Status change on the agent's leg of a warm transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLegEvent {
    pub call_id: CallId,
    pub agent_id: AgentId,
    pub provider_call_id: Option<ProviderCallId>,
    pub status: CallStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceEvent {
    pub call_id: CallId,
    pub conference_id: String,
    pub event: ConferenceEventKind,
    pub timestamp: DateTime<Utc>,
}
