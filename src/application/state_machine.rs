//! Call state machine
//!
//! Every provider callback is an independent unit of work. Handlers resolve
//! the call by the provider's id (falling back to our own id), merge the event
//! into the record with compare-and-swap, and fire side effects only for the
//! transition they actually stored. Replays and late duplicates therefore do
//! nothing.

use crate::application::agent_matcher::AgentMatcher;
use crate::application::call_updates::{merge_call, Merge};
use crate::application::error::{DialerError, DialerResult};
use crate::application::events::{now_ts, DialerEvent, EventBus};
use crate::application::retry::RetryScheduler;
use crate::application::settings::DialerSettings;
use crate::domain::agent::AgentRepository;
use crate::domain::call::{
    AgentLegEvent, AnswerDetectionEvent, AnswerTransition, Call, CallRepository, CallStatus,
    ConferenceEvent, Disposition, Recording, RecordingEvent, StatusEvent, StatusTransition,
};
use crate::domain::campaign::{Campaign, CampaignRepository};
use crate::domain::lead::{LeadRepository, LeadStatus};
use crate::domain::shared::{CallId, DomainError, ProviderCallId};
use crate::domain::telephony::{CallInstruction, EventCallback, TelephonyProvider};
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct CallStateMachine {
    calls: Arc<dyn CallRepository>,
    leads: Arc<dyn LeadRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    agents: Arc<dyn AgentRepository>,
    provider: Arc<dyn TelephonyProvider>,
    matcher: Arc<AgentMatcher>,
    retry: Arc<RetryScheduler>,
    events: Arc<EventBus>,
    settings: DialerSettings,
}

impl CallStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calls: Arc<dyn CallRepository>,
        leads: Arc<dyn LeadRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        agents: Arc<dyn AgentRepository>,
        provider: Arc<dyn TelephonyProvider>,
        matcher: Arc<AgentMatcher>,
        retry: Arc<RetryScheduler>,
        events: Arc<EventBus>,
        settings: DialerSettings,
    ) -> Self {
        Self {
            calls,
            leads,
            campaigns,
            agents,
            provider,
            matcher,
            retry,
            events,
            settings,
        }
    }

    /// Lead-leg status change
    pub async fn on_status(&self, event: StatusEvent) -> DialerResult<()> {
        let call = self
            .resolve(event.call_id, Some(&event.provider_call_id))
            .await?;

        let merged = merge_call(self.calls.as_ref(), call.id, |c| {
            match c.apply_status(event.status, event.duration_seconds, Utc::now()) {
                StatusTransition::Ignored => None,
                transition => Some(transition),
            }
        })
        .await?;

        match merged {
            Merge::Missing => Err(DialerError::UnknownCorrelationId(call.id.to_string())),
            Merge::Unchanged(current) => {
                counter!("dialer_events_dropped_total", "reason" => "duplicate").increment(1);
                debug!(
                    "Ignoring status {} for call {} (currently {})",
                    event.status.as_str(),
                    current.id,
                    current.status.as_str()
                );
                Ok(())
            }
            Merge::Applied(call, StatusTransition::Terminated(disposition)) => {
                self.on_lead_leg_terminal(&call, disposition).await;
                Ok(())
            }
            Merge::Applied(call, _) => {
                debug!("Call {} is now {}", call.id, call.status.as_str());
                self.events.publish(DialerEvent::CallStatusChanged {
                    call_id: call.id,
                    status: call.status,
                    timestamp: now_ts(),
                });
                Ok(())
            }
        }
    }

    /// Answering-machine detection result
    pub async fn on_answer_detection(&self, event: AnswerDetectionEvent) -> DialerResult<()> {
        let call = self
            .resolve(event.call_id, Some(&event.provider_call_id))
            .await?;

        let merged = merge_call(self.calls.as_ref(), call.id, |c| {
            match c.apply_answer_detection(event.answered_by, Utc::now()) {
                AnswerTransition::Ignored => None,
                transition => Some(transition),
            }
        })
        .await?;

        let (call, transition) = match merged {
            Merge::Missing => return Err(DialerError::UnknownCorrelationId(call.id.to_string())),
            Merge::Unchanged(current) => {
                counter!("dialer_events_dropped_total", "reason" => "duplicate").increment(1);
                debug!("Ignoring repeated answer detection for call {}", current.id);
                return Ok(());
            }
            Merge::Applied(call, transition) => (call, transition),
        };

        info!(
            "Call {} answered by {}",
            call.id,
            event.answered_by.as_str()
        );
        self.events.publish(DialerEvent::CallAnswered {
            call_id: call.id,
            answered_by: event.answered_by,
            timestamp: now_ts(),
        });

        match transition {
            AnswerTransition::Human => self.route_or_fall_back(&call).await,
            _ => {
                let campaign = self.campaign_for(&call).await?;
                self.drop_voicemail(&call, &campaign).await;
                Ok(())
            }
        }
    }

    /// Recording finished. Allowed after the call ended.
    pub async fn on_recording(&self, event: RecordingEvent) -> DialerResult<()> {
        let call = self
            .resolve(event.call_id, event.provider_call_id.as_ref())
            .await?;

        let recording = Recording {
            recording_id: event.recording_id.clone(),
            url: event.recording_url.clone(),
            duration_seconds: event.duration_seconds,
        };
        let merged = merge_call(self.calls.as_ref(), call.id, |c| {
            c.attach_recording(recording.clone()).then_some(())
        })
        .await?;

        if let Merge::Applied(call, ()) = merged {
            info!(
                "Recording {} attached to call {} ({}s)",
                recording.recording_id, call.id, recording.duration_seconds
            );
        }
        Ok(())
    }

    /// Conference lifecycle event. Merged as data only; the agent leg decides
    /// when a transfer is over.
    pub async fn on_conference_event(&self, event: ConferenceEvent) -> DialerResult<()> {
        let merged = merge_call(self.calls.as_ref(), event.call_id, |c| {
            c.record_conference_event(event.event, event.timestamp)
                .then_some(())
        })
        .await?;

        match merged {
            Merge::Missing => Err(DialerError::UnknownCorrelationId(event.call_id.to_string())),
            Merge::Unchanged(_) => Ok(()),
            Merge::Applied(call, ()) => {
                debug!(
                    "Conference {} {} for call {}",
                    event.conference_id,
                    event.event.as_str(),
                    call.id
                );
                Ok(())
            }
        }
    }

    /// Agent-leg status change. Once an agent leg is dialled, its terminal
    /// status is what releases the agent's reservation.
    pub async fn on_agent_leg_status(&self, event: AgentLegEvent) -> DialerResult<()> {
        let call = self
            .calls
            .get(event.call_id)
            .await?
            .ok_or_else(|| DialerError::UnknownCorrelationId(event.call_id.to_string()))?;

        if !call.tried_agents.contains(&event.agent_id) {
            return Err(DialerError::UnknownCorrelationId(format!(
                "agent {} on call {}",
                event.agent_id, event.call_id
            )));
        }

        if let Some(agent_call_id) = event.provider_call_id.clone() {
            merge_call(self.calls.as_ref(), call.id, |c| {
                c.attach_agent_leg_call_id(event.agent_id, agent_call_id.clone())
                    .then_some(())
            })
            .await?;
        }

        if !event.status.is_terminal() {
            debug!(
                "Agent {} leg for call {} is {}",
                event.agent_id,
                call.id,
                event.status.as_str()
            );
            return Ok(());
        }

        let merged = merge_call(self.calls.as_ref(), call.id, |c| c.end_agent_leg(event.agent_id))
            .await?;
        let (call, leg) = match merged {
            Merge::Applied(call, leg) => (call, leg),
            _ => {
                counter!("dialer_events_dropped_total", "reason" => "duplicate").increment(1);
                debug!(
                    "Agent {} leg for call {} already closed",
                    event.agent_id, event.call_id
                );
                return Ok(());
            }
        };

        self.matcher.release_agent(leg.agent_id).await;

        if leg.accepted {
            counter!("dialer_transfers_total", "outcome" => "completed").increment(1);
            info!("Agent {} left call {}, ending transfer", leg.agent_id, call.id);
            if call.is_terminal() {
                return Ok(());
            }
            if let Some(lead_call_id) = call.provider_call_id.as_ref() {
                if let Err(e) = self.provider.end_call(lead_call_id).await {
                    warn!("Failed to end lead leg of call {}: {}", call.id, e);
                }
            }
            let finished = merge_call(self.calls.as_ref(), call.id, |c| {
                match c.apply_status(CallStatus::Completed, None, Utc::now()) {
                    StatusTransition::Terminated(d) => Some(d),
                    _ => None,
                }
            })
            .await?;
            if let Merge::Applied(call, disposition) = finished {
                self.on_lead_leg_terminal(&call, disposition).await;
            }
            return Ok(());
        }

        counter!("dialer_transfers_total", "outcome" => "not_accepted").increment(1);
        info!(
            "Agent {} did not take call {} ({})",
            leg.agent_id,
            call.id,
            event.status.as_str()
        );
        if call.is_terminal() {
            return Ok(());
        }
        self.route_or_fall_back(&call).await
    }

    /// Offer the call to the next agent, or drop to voicemail when none is left
    async fn route_or_fall_back(&self, call: &Call) -> DialerResult<()> {
        let lead = self
            .leads
            .get(call.lead_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("lead {}", call.lead_id)))?;
        let campaign = self.campaign_for(call).await?;

        match self.matcher.route(call, &lead, &campaign).await {
            Ok(_) => Ok(()),
            Err(DialerError::NoAgentAvailable(call_id)) => {
                warn!("No agent for call {}, falling back to voicemail", call_id);
                let merged = merge_call(self.calls.as_ref(), call_id, |c| {
                    c.fall_back_to_voicemail().then_some(())
                })
                .await?;
                if let Merge::Applied(call, ()) = merged {
                    self.drop_voicemail(&call, &campaign).await;
                }
                Ok(())
            }
            Err(DialerError::Domain(DomainError::InvalidStateTransition(reason))) => {
                debug!("Not routing call {}: {}", call.id, reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Play the message, record and hang up. The retry waits for the lead leg
    /// to end so the lead is never queued while this call is live.
    async fn drop_voicemail(&self, call: &Call, campaign: &Campaign) {
        let instructions = self.voicemail_instructions(call.id, campaign);
        match call.provider_call_id.as_ref() {
            Some(provider_call_id) => {
                if let Err(e) = self.provider.update_call(provider_call_id, &instructions).await {
                    error!("Failed to start voicemail drop on call {}: {}", call.id, e);
                }
            }
            None => warn!("Call {} has no provider id, skipping voicemail drop", call.id),
        }
    }

    pub fn voicemail_instructions(&self, call_id: CallId, campaign: &Campaign) -> Vec<CallInstruction> {
        let message = match campaign.voicemail_message_url.as_deref() {
            Some(url) if !url.is_empty() => CallInstruction::Play(url.to_string()),
            _ => CallInstruction::Say(self.settings.default_voicemail_message.clone()),
        };
        vec![
            message,
            CallInstruction::Record {
                max_length_secs: self.settings.voicemail_max_length_secs,
                callback: Some(EventCallback::Recording { call_id }),
            },
            CallInstruction::Hangup,
        ]
    }

    /// Side effects of the lead leg ending. Runs once per call.
    async fn on_lead_leg_terminal(&self, call: &Call, disposition: Disposition) {
        info!(
            "Call {} ended: status {}, disposition {}",
            call.id,
            call.status.as_str(),
            disposition.as_str()
        );
        self.events.publish(DialerEvent::CallEnded {
            call_id: call.id,
            status: call.status,
            disposition,
            timestamp: now_ts(),
        });

        if call.status == CallStatus::Completed {
            if let Err(e) = self.campaigns.increment_calls_completed(call.campaign_id).await {
                error!("Failed to count completed call {}: {}", call.id, e);
            }
            if let (true, Some(agent_id)) = (call.was_accepted(), call.agent_id) {
                let duration = call.duration_seconds.unwrap_or(0);
                if let Err(e) = self.agents.record_completed_call(agent_id, duration).await {
                    error!("Failed to record call {} for agent {}: {}", call.id, agent_id, e);
                }
            }
        }

        if disposition.needs_retry() {
            self.schedule_retry(call.id).await;
        } else if let Err(e) = self.leads.set_status(call.lead_id, LeadStatus::Completed).await {
            error!("Failed to complete lead {}: {}", call.lead_id, e);
        }

        // Lead hung up while an agent leg is still up
        if let Some(leg) = call.agent_leg.as_ref().filter(|leg| !leg.released) {
            match leg.provider_call_id.as_ref() {
                Some(agent_call_id) => {
                    info!("Ending agent {} leg of finished call {}", leg.agent_id, call.id);
                    if let Err(e) = self.provider.end_call(agent_call_id).await {
                        warn!("Failed to end agent leg of call {}: {}", call.id, e);
                    }
                }
                None => warn!(
                    "Agent {} leg of call {} has no provider id yet",
                    leg.agent_id, call.id
                ),
            }
        }
    }

    /// Hand the lead to the retry scheduler, at most once per call
    async fn schedule_retry(&self, call_id: CallId) {
        let merged = match merge_call(self.calls.as_ref(), call_id, |c| c.claim_retry().then_some(())).await {
            Ok(merged) => merged,
            Err(e) => {
                error!("Failed to claim retry for call {}: {}", call_id, e);
                return;
            }
        };

        if let Merge::Applied(call, ()) = merged {
            if let Err(e) = self.retry.schedule_or_complete(call.lead_id).await {
                error!("Failed to schedule retry for lead {}: {}", call.lead_id, e);
            }
        }
    }

    /// Find the call an event belongs to. The provider id wins; our own id is
    /// the fallback and gets the provider id attached on first sight.
    async fn resolve(
        &self,
        call_id: Option<CallId>,
        provider_call_id: Option<&ProviderCallId>,
    ) -> DialerResult<Call> {
        if let Some(pid) = provider_call_id {
            if let Some(call) = self.calls.find_by_provider_call_id(pid).await? {
                return Ok(call);
            }
        }

        let Some(call_id) = call_id else {
            return Err(DialerError::UnknownCorrelationId(
                provider_call_id.map_or_else(|| "<none>".to_string(), |p| p.to_string()),
            ));
        };
        let call = self
            .calls
            .get(call_id)
            .await?
            .ok_or_else(|| DialerError::UnknownCorrelationId(call_id.to_string()))?;

        match (provider_call_id, call.provider_call_id.as_ref()) {
            (Some(pid), None) => {
                let merged = merge_call(self.calls.as_ref(), call_id, |c| {
                    c.attach_provider_call_id(pid.clone()).then_some(())
                })
                .await?;
                match merged {
                    Merge::Applied(call, ()) | Merge::Unchanged(call) => Ok(call),
                    Merge::Missing => Err(DialerError::UnknownCorrelationId(call_id.to_string())),
                }
            }
            (Some(pid), Some(known)) if pid != known => Err(DialerError::UnknownCorrelationId(
                format!("provider call {} on call {}", pid, call_id),
            )),
            _ => Ok(call),
        }
    }

    async fn campaign_for(&self, call: &Call) -> DialerResult<Campaign> {
        self.campaigns
            .get(call.campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", call.campaign_id)).into())
    }
}
