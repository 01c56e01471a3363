//! Agent matcher and warm-transfer orchestrator
//!
//! On a human answer the lead is parked in a conference named after the call
//! while the least-loaded eligible agent is dialled. The agent hears a
//! whisper and must press a key before being joined.

use crate::application::call_updates::{merge_call, Merge};
use crate::application::error::{DialerError, DialerResult};
use crate::application::events::{now_ts, DialerEvent, EventBus};
use crate::application::settings::DialerSettings;
use crate::domain::agent::AgentRepository;
use crate::domain::call::{Call, CallRepository};
use crate::domain::campaign::Campaign;
use crate::domain::conference::ConferenceName;
use crate::domain::lead::{Lead, LeadRepository};
use crate::domain::shared::{AgentId, CallId, DomainError};
use crate::domain::telephony::{
    CallInstruction, CallLeg, ConferenceJoin, EventCallback, PlaceCallRequest, TelephonyProvider,
};
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AgentMatcher {
    agents: Arc<dyn AgentRepository>,
    calls: Arc<dyn CallRepository>,
    leads: Arc<dyn LeadRepository>,
    provider: Arc<dyn TelephonyProvider>,
    events: Arc<EventBus>,
    settings: DialerSettings,
}

impl AgentMatcher {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        calls: Arc<dyn CallRepository>,
        leads: Arc<dyn LeadRepository>,
        provider: Arc<dyn TelephonyProvider>,
        events: Arc<EventBus>,
        settings: DialerSettings,
    ) -> Self {
        Self {
            agents,
            calls,
            leads,
            provider,
            events,
            settings,
        }
    }

    /// Reserve an agent and start the warm transfer for an answered call.
    ///
    /// Agents that fail to dial are skipped in favour of the next best one.
    /// Returns `NoAgentAvailable` once no eligible agent is left; the caller
    /// owns the fallback.
    pub async fn route(&self, call: &Call, lead: &Lead, campaign: &Campaign) -> DialerResult<AgentId> {
        let mut exclude = call.tried_agents.clone();

        loop {
            let Some(agent) = self
                .agents
                .reserve(campaign.agent_group_id, &exclude)
                .await?
            else {
                counter!("dialer_transfers_total", "outcome" => "no_agent").increment(1);
                info!("No agent available for call {}", call.id);
                return Err(DialerError::NoAgentAvailable(call.id));
            };
            exclude.push(agent.id);
            self.publish_agent(&agent);

            let merged = merge_call(self.calls.as_ref(), call.id, |c| {
                if c.is_terminal() || c.has_open_agent_leg() {
                    return None;
                }
                c.begin_transfer(agent.id, Utc::now()).ok()
            })
            .await?;

            let call = match merged {
                Merge::Applied(call, ()) => call,
                Merge::Missing => {
                    self.release_agent(agent.id).await;
                    return Err(DialerError::UnknownCorrelationId(call.id.to_string()));
                }
                Merge::Unchanged(current) => {
                    self.release_agent(agent.id).await;
                    return Err(DomainError::InvalidStateTransition(format!(
                        "call {} cannot take an agent (status {}, phase {})",
                        current.id,
                        current.status.as_str(),
                        current.phase.as_str()
                    ))
                    .into());
                }
            };
            let conference = call
                .conference
                .clone()
                .unwrap_or_else(|| ConferenceName::for_call(call.id));

            // First offer moves the lead from the answer into the hold conference
            if call.tried_agents.len() == 1 {
                self.park_lead(&call, &conference, campaign).await;
            }

            let request = PlaceCallRequest {
                call_id: call.id,
                to: agent.phone.clone(),
                from: if campaign.caller_id.is_empty() {
                    self.settings.default_caller_id.clone()
                } else {
                    campaign.caller_id.clone()
                },
                leg: CallLeg::Agent { agent_id: agent.id },
                ring_timeout_secs: self.settings.agent_ring_timeout_secs,
            };

            match self.provider.place_call(&request).await {
                Ok(agent_call_id) => {
                    merge_call(self.calls.as_ref(), call.id, |c| {
                        c.attach_agent_leg_call_id(agent.id, agent_call_id.clone())
                            .then_some(())
                    })
                    .await?;

                    counter!("dialer_transfers_total", "outcome" => "dialed").increment(1);
                    info!(
                        "Call {} routed to agent {} via conference {} (lead {})",
                        call.id, agent.id, conference, lead.id
                    );
                    self.events.publish(DialerEvent::TransferStarted {
                        call_id: call.id,
                        agent_id: agent.id,
                        conference: conference.to_string(),
                        timestamp: now_ts(),
                    });
                    return Ok(agent.id);
                }
                Err(e) => {
                    counter!("dialer_transfers_total", "outcome" => "dial_failed").increment(1);
                    warn!("Failed to dial agent {} for call {}: {}", agent.id, call.id, e);
                    merge_call(self.calls.as_ref(), call.id, |c| {
                        c.end_agent_leg(agent.id).map(|_| ())
                    })
                    .await?;
                    self.release_agent(agent.id).await;
                }
            }
        }
    }

    /// Whisper for the agent leg once the agent picks up
    pub async fn agent_answered(
        &self,
        call_id: CallId,
        agent_id: AgentId,
    ) -> DialerResult<Vec<CallInstruction>> {
        let call = self
            .calls
            .get(call_id)
            .await?
            .ok_or_else(|| DialerError::UnknownCorrelationId(call_id.to_string()))?;

        if call.is_terminal() || call.open_leg_for(agent_id).is_none() {
            debug!("Agent {} answered but call {} is gone", agent_id, call_id);
            return Ok(vec![CallInstruction::Hangup]);
        }

        let lead_name = self
            .leads
            .get(call.lead_id)
            .await?
            .and_then(|lead| lead.display_name())
            .unwrap_or_else(|| "a customer".to_string());

        Ok(vec![
            CallInstruction::Say(format!(
                "Connecting you with {}. Press any key to accept.",
                lead_name
            )),
            CallInstruction::Gather {
                num_digits: 1,
                timeout_secs: self.settings.agent_accept_timeout_secs,
                action: EventCallback::AgentAccept { call_id, agent_id },
                prompt: "Press any key to accept this call.".to_string(),
            },
            CallInstruction::Say("No response received. Call ended.".to_string()),
            CallInstruction::Hangup,
        ])
    }

    /// Explicit accept: join the agent into the conference
    pub async fn agent_accepted(
        &self,
        call_id: CallId,
        agent_id: AgentId,
    ) -> DialerResult<Vec<CallInstruction>> {
        let merged = merge_call(self.calls.as_ref(), call_id, |c| {
            c.accept_agent(agent_id).then_some(())
        })
        .await?;

        let call = match merged {
            Merge::Missing => return Err(DialerError::UnknownCorrelationId(call_id.to_string())),
            Merge::Applied(call, ()) => {
                counter!("dialer_transfers_total", "outcome" => "accepted").increment(1);
                info!("Agent {} accepted call {}", agent_id, call_id);
                self.events.publish(DialerEvent::AgentConnected {
                    call_id,
                    agent_id,
                    timestamp: now_ts(),
                });
                call
            }
            Merge::Unchanged(call) => call,
        };

        let joined = call
            .open_leg_for(agent_id)
            .map_or(false, |leg| leg.accepted);
        if call.is_terminal() || !joined {
            debug!("Agent {} accept for call {} came too late", agent_id, call_id);
            return Ok(vec![CallInstruction::Hangup]);
        }

        let conference = call
            .conference
            .clone()
            .unwrap_or_else(|| ConferenceName::for_call(call_id));
        Ok(vec![
            CallInstruction::Say("Connecting now.".to_string()),
            CallInstruction::JoinConference(ConferenceJoin {
                name: conference,
                wait_url: None,
                start_on_enter: true,
                end_on_exit: true,
                beep: false,
                record: false,
                status_callback: Some(EventCallback::ConferenceStatus { call_id }),
                recording_callback: None,
            }),
        ])
    }

    /// Release one reservation and publish the agent's new load
    pub async fn release_agent(&self, agent_id: AgentId) {
        match self.agents.release(agent_id).await {
            Ok(Some(agent)) => {
                debug!(
                    "Released agent {} (current_calls {})",
                    agent.id, agent.current_calls
                );
                self.publish_agent(&agent);
            }
            Ok(None) => warn!("Released unknown agent {}", agent_id),
            Err(e) => warn!("Failed to release agent {}: {}", agent_id, e),
        }
    }

    async fn park_lead(&self, call: &Call, conference: &ConferenceName, campaign: &Campaign) {
        let Some(lead_call_id) = call.provider_call_id.as_ref() else {
            warn!("Call {} has no provider id, cannot park lead", call.id);
            return;
        };

        let instructions = vec![
            CallInstruction::Say("Please hold while we connect you with an agent.".to_string()),
            CallInstruction::JoinConference(ConferenceJoin {
                name: conference.clone(),
                wait_url: Some(self.settings.hold_music_url.clone()),
                start_on_enter: true,
                end_on_exit: false,
                beep: false,
                record: campaign.record_calls,
                status_callback: Some(EventCallback::ConferenceStatus { call_id: call.id }),
                recording_callback: campaign
                    .record_calls
                    .then_some(EventCallback::Recording { call_id: call.id }),
            }),
        ];

        if let Err(e) = self.provider.update_call(lead_call_id, &instructions).await {
            warn!("Failed to move call {} into conference {}: {}", call.id, conference, e);
        }
    }

    fn publish_agent(&self, agent: &crate::domain::agent::Agent) {
        self.events.publish(DialerEvent::AgentStatusChanged {
            agent_id: agent.id,
            status: agent.status,
            current_calls: agent.current_calls,
            timestamp: now_ts(),
        });
    }
}
