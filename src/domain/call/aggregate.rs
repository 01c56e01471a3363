//! Call aggregate root
//!
//! A `Call` is mutated only through the merge methods below. Each one is
//! idempotent: applying the same event twice leaves the record unchanged and
//! reports that nothing happened, so side effects keyed on the returned
//! transition fire at most once.

use crate::domain::call::value_object::{
    AnsweredBy, CallDirection, CallPhase, CallStatus, Disposition,
};
use crate::domain::conference::{ConferenceEventKind, ConferenceName};
use crate::domain::shared::{
    AgentId, CallId, CampaignId, DomainError, LeadId, ProviderCallId, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Agent side of a warm transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLeg {
    pub agent_id: AgentId,
    pub provider_call_id: Option<ProviderCallId>,
    /// Agent pressed a key after the whisper
    pub accepted: bool,
    /// Reservation has been given back
    pub released: bool,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: String,
    pub url: String,
    pub duration_seconds: i64,
}

/// Outcome of merging a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// Duplicate, stale or post-terminal event
    Ignored,
    /// Moved forward to a non-terminal status
    Advanced,
    /// Became terminal with the given disposition
    Terminated(Disposition),
}

/// Outcome of merging an answer-detection event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerTransition {
    Ignored,
    Human,
    Machine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    /// Agent currently or last bound to this call
    pub agent_id: Option<AgentId>,
    pub provider_call_id: Option<ProviderCallId>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub disposition: Option<Disposition>,
    pub answered_by: Option<AnsweredBy>,
    pub phase: CallPhase,
    pub agent_leg: Option<AgentLeg>,
    /// Agents already offered this call, in order
    pub tried_agents: Vec<AgentId>,
    pub conference: Option<ConferenceName>,
    pub recording: Option<Recording>,
    pub conference_events: BTreeMap<String, DateTime<Utc>>,
    /// A retry decision has been taken for this attempt
    pub retry_scheduled: bool,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// Optimistic concurrency token, bumped by the store on every update
    pub version: i64,
}

impl Call {
    /// Create an outbound call in `initiated`
    pub fn new(campaign_id: CampaignId, lead_id: LeadId) -> Self {
        Self {
            id: CallId::new(),
            campaign_id,
            lead_id,
            agent_id: None,
            provider_call_id: None,
            direction: CallDirection::Outbound,
            status: CallStatus::Initiated,
            disposition: None,
            answered_by: None,
            phase: CallPhase::Dialing,
            agent_leg: None,
            tried_agents: Vec::new(),
            conference: None,
            recording: None,
            conference_events: BTreeMap::new(),
            retry_scheduled: false,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record the provider's id for the lead leg. Never overwrites.
    pub fn attach_provider_call_id(&mut self, id: ProviderCallId) -> bool {
        if self.provider_call_id.is_some() {
            return false;
        }
        self.provider_call_id = Some(id);
        true
    }

    /// Merge a lead-leg status event. Statuses only move forward and a
    /// terminal call never changes status again.
    pub fn apply_status(
        &mut self,
        status: CallStatus,
        duration_seconds: Option<i64>,
        at: DateTime<Utc>,
    ) -> StatusTransition {
        if self.is_terminal() {
            return StatusTransition::Ignored;
        }
        if !status.is_terminal() && status.rank() <= self.status.rank() {
            return StatusTransition::Ignored;
        }

        self.status = status;
        if status == CallStatus::Answered && self.answered_at.is_none() {
            self.answered_at = Some(at);
        }
        if !status.is_terminal() {
            return StatusTransition::Advanced;
        }

        self.ended_at = Some(at);
        if duration_seconds.is_some() {
            self.duration_seconds = duration_seconds;
        } else if self.duration_seconds.is_none() {
            let anchor = self.answered_at.unwrap_or(self.started_at);
            self.duration_seconds = Some((at - anchor).num_seconds().max(0));
        }

        let disposition = match Disposition::from_terminal_status(status) {
            Some(d) => d,
            None => self.disposition.unwrap_or(Disposition::Completed),
        };
        self.disposition = Some(disposition);
        StatusTransition::Terminated(disposition)
    }

    /// Merge an answer-detection result. Only the first result counts.
    pub fn apply_answer_detection(
        &mut self,
        answered_by: AnsweredBy,
        at: DateTime<Utc>,
    ) -> AnswerTransition {
        if self.is_terminal() || self.answered_by.is_some() {
            return AnswerTransition::Ignored;
        }

        self.answered_by = Some(answered_by);
        if self.status.rank() < CallStatus::Answered.rank() {
            self.status = CallStatus::Answered;
        }
        if self.answered_at.is_none() {
            self.answered_at = Some(at);
        }

        if answered_by.is_human() {
            self.disposition = Some(Disposition::Answered);
            AnswerTransition::Human
        } else {
            self.disposition = Some(Disposition::Voicemail);
            self.phase = CallPhase::Voicemail;
            AnswerTransition::Machine
        }
    }

    /// Bind a freshly reserved agent and open the conference
    pub fn begin_transfer(&mut self, agent_id: AgentId, at: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(DomainError::InvalidStateTransition(format!(
                "call {} already ended",
                self.id
            )));
        }
        if self.has_open_agent_leg() {
            return Err(DomainError::Conflict(format!(
                "call {} already has an agent leg",
                self.id
            )));
        }

        self.agent_id = Some(agent_id);
        self.agent_leg = Some(AgentLeg {
            agent_id,
            provider_call_id: None,
            accepted: false,
            released: false,
            reserved_at: at,
        });
        if !self.tried_agents.contains(&agent_id) {
            self.tried_agents.push(agent_id);
        }
        let call_id = self.id;
        self.conference
            .get_or_insert_with(|| ConferenceName::for_call(call_id));
        self.phase = CallPhase::Transferring;
        Ok(())
    }

    pub fn has_open_agent_leg(&self) -> bool {
        self.agent_leg.as_ref().map_or(false, |leg| !leg.released)
    }

    /// The open agent leg, if it belongs to `agent_id`
    pub fn open_leg_for(&self, agent_id: AgentId) -> Option<&AgentLeg> {
        self.agent_leg
            .as_ref()
            .filter(|leg| leg.agent_id == agent_id && !leg.released)
    }

    pub fn attach_agent_leg_call_id(&mut self, agent_id: AgentId, id: ProviderCallId) -> bool {
        match self.agent_leg.as_mut() {
            Some(leg) if leg.agent_id == agent_id && leg.provider_call_id.is_none() => {
                leg.provider_call_id = Some(id);
                true
            }
            _ => false,
        }
    }

    /// Explicit accept after the whisper
    pub fn accept_agent(&mut self, agent_id: AgentId) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self.agent_leg.as_mut() {
            Some(leg) if leg.agent_id == agent_id && !leg.released && !leg.accepted => {
                leg.accepted = true;
                self.phase = CallPhase::Connected;
                true
            }
            _ => false,
        }
    }

    /// Close the agent leg. Returns the leg as it was when it ended, only
    /// the first time.
    pub fn end_agent_leg(&mut self, agent_id: AgentId) -> Option<AgentLeg> {
        match self.agent_leg.as_mut() {
            Some(leg) if leg.agent_id == agent_id && !leg.released => {
                leg.released = true;
                Some(leg.clone())
            }
            _ => None,
        }
    }

    /// Whether an accepted agent handled this call
    pub fn was_accepted(&self) -> bool {
        self.agent_leg.as_ref().map_or(false, |leg| leg.accepted)
    }

    /// Route an answered call to the voicemail path
    pub fn fall_back_to_voicemail(&mut self) -> bool {
        if self.is_terminal() || self.phase == CallPhase::Voicemail {
            return false;
        }
        self.disposition = Some(Disposition::Voicemail);
        self.phase = CallPhase::Voicemail;
        true
    }

    /// Claim the single retry decision for this attempt
    pub fn claim_retry(&mut self) -> bool {
        if self.retry_scheduled {
            return false;
        }
        self.retry_scheduled = true;
        true
    }

    /// Attach a recording. Allowed after the call ended.
    pub fn attach_recording(&mut self, recording: Recording) -> bool {
        if self.recording.as_ref() == Some(&recording) {
            return false;
        }
        self.recording = Some(recording);
        true
    }

    /// Record the first occurrence of a conference event
    pub fn record_conference_event(&mut self, kind: ConferenceEventKind, at: DateTime<Utc>) -> bool {
        if self.conference_events.contains_key(kind.as_str()) {
            return false;
        }
        self.conference_events.insert(kind.as_str().to_string(), at);
        true
    }
}
