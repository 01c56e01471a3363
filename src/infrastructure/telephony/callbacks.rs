//! Twilio webhook forms to normalised domain events
//!
//! Our own ids travel in the callback URL query (`callId`, `agentId`); the
//! provider's fields travel in the form body.

use crate::domain::call::{
    AgentLegEvent, AnsweredBy, AnswerDetectionEvent, CallStatus, ConferenceEvent, RecordingEvent,
    StatusEvent,
};
use crate::domain::conference::ConferenceEventKind;
use crate::domain::shared::{AgentId, CallId, DomainError, ProviderCallId, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Query parameters we append to every callback URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "callId")]
    pub call_id: Option<String>,
    #[serde(rename = "agentId")]
    pub agent_id: Option<String>,
}

impl CallbackQuery {
    /// A malformed id is treated like a missing one
    pub fn call_id(&self) -> Option<CallId> {
        self.call_id.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        self.agent_id.as_deref().and_then(|s| s.parse().ok())
    }

    fn require_call_id(&self) -> Result<CallId> {
        self.call_id()
            .ok_or_else(|| DomainError::ValidationError("missing or invalid callId".to_string()))
    }

    fn require_agent_id(&self) -> Result<AgentId> {
        self.agent_id()
            .ok_or_else(|| DomainError::ValidationError("missing or invalid agentId".to_string()))
    }
}

/// Decoded form body, order preserved for signature checks
#[derive(Debug, Clone, Default)]
pub struct CallbackForm {
    params: Vec<(String, String)>,
}

impl CallbackForm {
    pub fn new(params: Vec<(String, String)>) -> Self {
        Self { params }
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let params: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| DomainError::ValidationError(format!("invalid form body: {}", e)))?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| DomainError::ValidationError(format!("missing {}", key)))
    }

    fn provider_call_id(&self) -> Result<ProviderCallId> {
        self.require("CallSid").map(ProviderCallId::new)
    }

    fn call_status(&self) -> Result<CallStatus> {
        let raw = self.require("CallStatus")?;
        CallStatus::parse(raw)
            .ok_or_else(|| DomainError::ValidationError(format!("unknown CallStatus {}", raw)))
    }

    fn seconds(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

pub fn parse_status(query: &CallbackQuery, form: &CallbackForm) -> Result<StatusEvent> {
    Ok(StatusEvent {
        call_id: query.call_id(),
        provider_call_id: form.provider_call_id()?,
        status: form.call_status()?,
        duration_seconds: form.seconds("CallDuration"),
    })
}

pub fn parse_answer_detection(
    query: &CallbackQuery,
    form: &CallbackForm,
) -> Result<AnswerDetectionEvent> {
    Ok(AnswerDetectionEvent {
        call_id: query.call_id(),
        provider_call_id: form.provider_call_id()?,
        answered_by: AnsweredBy::parse(form.get("AnsweredBy").unwrap_or("unknown")),
    })
}

/// `None` for intermediate recording states
pub fn parse_recording(
    query: &CallbackQuery,
    form: &CallbackForm,
) -> Result<Option<RecordingEvent>> {
    if let Some(status) = form.get("RecordingStatus") {
        if status != "completed" {
            return Ok(None);
        }
    }

    Ok(Some(RecordingEvent {
        call_id: query.call_id(),
        provider_call_id: form.get("CallSid").map(ProviderCallId::new),
        recording_id: form.require("RecordingSid")?.to_string(),
        recording_url: form.require("RecordingUrl")?.to_string(),
        duration_seconds: form.seconds("RecordingDuration").unwrap_or(0),
    }))
}

pub fn parse_agent_status(query: &CallbackQuery, form: &CallbackForm) -> Result<AgentLegEvent> {
    Ok(AgentLegEvent {
        call_id: query.require_call_id()?,
        agent_id: query.require_agent_id()?,
        provider_call_id: form.get("CallSid").map(ProviderCallId::new),
        status: form.call_status()?,
    })
}

/// Agent answer and accept callbacks only need our ids
pub fn parse_agent_ids(query: &CallbackQuery) -> Result<(CallId, AgentId)> {
    Ok((query.require_call_id()?, query.require_agent_id()?))
}

/// `None` for conference events the engine does not track
pub fn parse_conference(
    query: &CallbackQuery,
    form: &CallbackForm,
) -> Result<Option<ConferenceEvent>> {
    let call_id = query.require_call_id()?;
    let Some(event) = ConferenceEventKind::parse(form.require("StatusCallbackEvent")?) else {
        return Ok(None);
    };
    let timestamp = form
        .get("Timestamp")
        .and_then(|ts| DateTime::parse_from_rfc2822(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(Some(ConferenceEvent {
        call_id,
        conference_id: form.get("ConferenceSid").unwrap_or_default().to_string(),
        event,
        timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(call_id: Option<CallId>, agent_id: Option<AgentId>) -> CallbackQuery {
        CallbackQuery {
            call_id: call_id.map(|id| id.to_string()),
            agent_id: agent_id.map(|id| id.to_string()),
        }
    }

    #[test]
    fn test_parse_form_body() {
        let form =
            CallbackForm::parse(b"CallSid=CA1&CallStatus=in-progress&From=%2B15551234567").unwrap();
        assert_eq!(form.get("From"), Some("+15551234567"));
        assert_eq!(form.params().len(), 3);
    }

    #[test]
    fn test_parse_status() {
        let call_id = CallId::new();
        let form = CallbackForm::parse(b"CallSid=CA1&CallStatus=completed&CallDuration=42").unwrap();
        let event = parse_status(&query(Some(call_id), None), &form).unwrap();

        assert_eq!(event.call_id, Some(call_id));
        assert_eq!(event.provider_call_id.as_str(), "CA1");
        assert_eq!(event.status, CallStatus::Completed);
        assert_eq!(event.duration_seconds, Some(42));
    }

    #[test]
    fn test_parse_status_rejects_unknown_status() {
        let form = CallbackForm::parse(b"CallSid=CA1&CallStatus=exploded").unwrap();
        assert!(parse_status(&CallbackQuery::default(), &form).is_err());
    }

    #[test]
    fn test_malformed_call_id_is_ignored() {
        let q = CallbackQuery {
            call_id: Some("not-a-uuid".to_string()),
            agent_id: None,
        };
        let form = CallbackForm::parse(b"CallSid=CA1&AnsweredBy=machine_end_beep").unwrap();
        let event = parse_answer_detection(&q, &form).unwrap();
        assert_eq!(event.call_id, None);
        assert_eq!(event.answered_by, AnsweredBy::MachineEndBeep);
    }

    #[test]
    fn test_parse_recording() {
        let form = CallbackForm::parse(
            b"RecordingSid=RE1&RecordingUrl=https%3A%2F%2Fapi.example.com%2FRE1&RecordingDuration=17&RecordingStatus=completed",
        )
        .unwrap();
        let event = parse_recording(&query(Some(CallId::new()), None), &form)
            .unwrap()
            .unwrap();
        assert_eq!(event.provider_call_id, None);
        assert_eq!(event.recording_url, "https://api.example.com/RE1");
        assert_eq!(event.duration_seconds, 17);

        let in_progress = CallbackForm::parse(b"RecordingSid=RE1&RecordingStatus=in-progress").unwrap();
        assert!(parse_recording(&CallbackQuery::default(), &in_progress)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_agent_status_requires_ids() {
        let form = CallbackForm::parse(b"CallSid=CA9&CallStatus=no-answer").unwrap();
        assert!(parse_agent_status(&query(Some(CallId::new()), None), &form).is_err());

        let agent_id = AgentId::new();
        let event = parse_agent_status(&query(Some(CallId::new()), Some(agent_id)), &form).unwrap();
        assert_eq!(event.agent_id, agent_id);
        assert_eq!(event.status, CallStatus::NoAnswer);
    }

    #[test]
    fn test_parse_conference() {
        let form = CallbackForm::parse(
            b"ConferenceSid=CF1&StatusCallbackEvent=participant-join&Timestamp=Sun%2C%2018%20Oct%202026%2010%3A00%3A00%20%2B0000",
        )
        .unwrap();
        let event = parse_conference(&query(Some(CallId::new()), None), &form)
            .unwrap()
            .unwrap();
        assert_eq!(event.event, ConferenceEventKind::Join);
        assert_eq!(event.conference_id, "CF1");
        assert_eq!(event.timestamp.to_rfc3339(), "2026-10-18T10:00:00+00:00");

        let untracked =
            CallbackForm::parse(b"ConferenceSid=CF1&StatusCallbackEvent=participant-mute").unwrap();
        assert!(parse_conference(&query(Some(CallId::new()), None), &untracked)
            .unwrap()
            .is_none());
    }
}
