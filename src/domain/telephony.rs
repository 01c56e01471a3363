//! Telephony provider port
//!
//! The engine never speaks a provider's wire format. It asks for calls to be
//! placed, hands live calls an ordered list of [`CallInstruction`]s and checks
//! inbound callbacks through this trait. Callback targets are expressed as
//! [`EventCallback`] values which the adapter turns into URLs.

use crate::domain::conference::ConferenceName;
use crate::domain::shared::{AgentId, CallId, LeadId, ProviderCallId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Answering-machine detection mode requested for the lead leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmdMode {
    /// Wait for the greeting to finish so a message can be dropped after it
    DetectMessageEnd,
    /// Report as soon as human or machine is known
    Enable,
}

impl AmdMode {
    pub fn for_campaign(amd_enabled: bool) -> Self {
        if amd_enabled {
            AmdMode::DetectMessageEnd
        } else {
            AmdMode::Enable
        }
    }
}

/// Which side of a call is being dialled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallLeg {
    Lead { lead_id: LeadId, amd: AmdMode },
    Agent { agent_id: AgentId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCallRequest {
    pub call_id: CallId,
    pub to: String,
    pub from: String,
    pub leg: CallLeg,
    pub ring_timeout_secs: u32,
}

/// Provider callback targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCallback {
    Status { call_id: CallId },
    AnswerDetection { call_id: CallId },
    Recording { call_id: CallId },
    AgentAnswer { call_id: CallId, agent_id: AgentId },
    AgentAccept { call_id: CallId, agent_id: AgentId },
    AgentStatus { call_id: CallId, agent_id: AgentId },
    ConferenceStatus { call_id: CallId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceJoin {
    pub name: ConferenceName,
    pub wait_url: Option<String>,
    pub start_on_enter: bool,
    pub end_on_exit: bool,
    pub beep: bool,
    pub record: bool,
    pub status_callback: Option<EventCallback>,
    pub recording_callback: Option<EventCallback>,
}

/// One step of in-call behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInstruction {
    Say(String),
    Play(String),
    Record {
        max_length_secs: u32,
        callback: Option<EventCallback>,
    },
    Gather {
        num_digits: u32,
        timeout_secs: u32,
        action: EventCallback,
        prompt: String,
    },
    JoinConference(ConferenceJoin),
    Hangup,
}

/// Instructions rendered in the provider's response format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedInstructions {
    pub content_type: &'static str,
    pub body: String,
}

/// Narrow interface to the telephony substrate
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Start an outbound leg. Returns the provider's call id.
    async fn place_call(&self, request: &PlaceCallRequest) -> Result<ProviderCallId>;

    /// Replace what a live call is doing
    async fn update_call(
        &self,
        provider_call_id: &ProviderCallId,
        instructions: &[CallInstruction],
    ) -> Result<()>;

    async fn end_call(&self, provider_call_id: &ProviderCallId) -> Result<()>;

    /// Authenticate a callback: signature over the exact URL and form body
    fn validate_inbound_event<'a>(
        &self,
        url: &str,
        params: &[(String, String)],
        signature: Option<&'a str>,
    ) -> bool;

    /// Render instructions for a synchronous callback response
    fn render(&self, instructions: &[CallInstruction]) -> RenderedInstructions;
}
