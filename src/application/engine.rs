//! Dialer engine - wires queue, launcher, state machine, matcher and retry
//! scheduler over one set of repositories and one telephony provider

use crate::application::agent_matcher::AgentMatcher;
use crate::application::call_queue::CallQueue;
use crate::application::campaign_service::CampaignService;
use crate::application::error::{DialerError, DialerResult, LaunchError};
use crate::application::events::{now_ts, DialerEvent, EventBus};
use crate::application::launcher::{CallHandle, CallLauncher};
use crate::application::retry::RetryScheduler;
use crate::application::settings::DialerSettings;
use crate::application::state_machine::CallStateMachine;
use crate::domain::agent::{Agent, AgentRepository, AgentStatus};
use crate::domain::call::{
    AgentLegEvent, AnswerDetectionEvent, Call, CallRepository, CallStats, ConferenceEvent,
    RecordingEvent, StatusEvent,
};
use crate::domain::call_queue::{QueueEntry, QueueRepository};
use crate::domain::campaign::{Campaign, CampaignRepository};
use crate::domain::lead::LeadRepository;
use crate::domain::shared::{AgentId, CallId, CampaignId, DomainError, Result};
use crate::domain::telephony::{CallInstruction, TelephonyProvider};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// The store ports the engine runs on
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub agents: Arc<dyn AgentRepository>,
    pub calls: Arc<dyn CallRepository>,
    pub queue: Arc<dyn QueueRepository>,
}

impl Repositories {
    /// Use one store for every port
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CampaignRepository
            + LeadRepository
            + AgentRepository
            + CallRepository
            + QueueRepository
            + 'static,
    {
        Self {
            campaigns: store.clone(),
            leads: store.clone(),
            agents: store.clone(),
            calls: store.clone(),
            queue: store,
        }
    }
}

/// Call statistics plus queue backlog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialerStats {
    #[serde(flatten)]
    pub calls: CallStats,
    pub queue_depth: i64,
}

pub struct DialerEngine {
    repos: Repositories,
    provider: Arc<dyn TelephonyProvider>,
    events: Arc<EventBus>,
    queue: Arc<CallQueue>,
    launcher: CallLauncher,
    state_machine: CallStateMachine,
    matcher: Arc<AgentMatcher>,
    campaigns: CampaignService,
}

impl DialerEngine {
    pub fn new(
        repos: Repositories,
        provider: Arc<dyn TelephonyProvider>,
        settings: DialerSettings,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let queue = Arc::new(CallQueue::new(repos.queue.clone(), repos.campaigns.clone()));
        let retry = Arc::new(RetryScheduler::new(
            repos.leads.clone(),
            repos.campaigns.clone(),
            queue.clone(),
            events.clone(),
        ));
        let matcher = Arc::new(AgentMatcher::new(
            repos.agents.clone(),
            repos.calls.clone(),
            repos.leads.clone(),
            provider.clone(),
            events.clone(),
            settings.clone(),
        ));
        let launcher = CallLauncher::new(
            repos.leads.clone(),
            repos.campaigns.clone(),
            repos.calls.clone(),
            provider.clone(),
            retry.clone(),
            events.clone(),
            settings.clone(),
        );
        let state_machine = CallStateMachine::new(
            repos.calls.clone(),
            repos.leads.clone(),
            repos.campaigns.clone(),
            repos.agents.clone(),
            provider.clone(),
            matcher.clone(),
            retry,
            events.clone(),
            settings,
        );
        let campaigns =
            CampaignService::new(repos.campaigns.clone(), repos.leads.clone(), queue.clone());

        Self {
            repos,
            provider,
            events,
            queue,
            launcher,
            state_machine,
            matcher,
            campaigns,
        }
    }

    pub fn provider(&self) -> &Arc<dyn TelephonyProvider> {
        &self.provider
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &CallQueue {
        &self.queue
    }

    pub async fn dequeue_batch(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        self.queue.dequeue_batch(campaign_id, now, limit).await
    }

    pub async fn launch(&self, entry: &QueueEntry) -> std::result::Result<CallHandle, LaunchError> {
        self.launcher.launch(entry).await
    }

    pub async fn active_campaigns(&self) -> Result<Vec<Campaign>> {
        self.repos.campaigns.list_active().await
    }

    pub async fn handle_status(&self, event: StatusEvent) -> DialerResult<()> {
        Self::drop_unresolvable(self.state_machine.on_status(event).await)
    }

    pub async fn handle_answer_detection(&self, event: AnswerDetectionEvent) -> DialerResult<()> {
        Self::drop_unresolvable(self.state_machine.on_answer_detection(event).await)
    }

    pub async fn handle_recording(&self, event: RecordingEvent) -> DialerResult<()> {
        Self::drop_unresolvable(self.state_machine.on_recording(event).await)
    }

    pub async fn handle_agent_leg_status(&self, event: AgentLegEvent) -> DialerResult<()> {
        Self::drop_unresolvable(self.state_machine.on_agent_leg_status(event).await)
    }

    pub async fn handle_conference_event(&self, event: ConferenceEvent) -> DialerResult<()> {
        Self::drop_unresolvable(self.state_machine.on_conference_event(event).await)
    }

    /// Whisper instructions for an answering agent
    pub async fn agent_answered(
        &self,
        call_id: CallId,
        agent_id: AgentId,
    ) -> DialerResult<Vec<CallInstruction>> {
        Self::hang_up_unresolvable(self.matcher.agent_answered(call_id, agent_id).await)
    }

    /// Conference join instructions for an accepting agent
    pub async fn agent_accepted(
        &self,
        call_id: CallId,
        agent_id: AgentId,
    ) -> DialerResult<Vec<CallInstruction>> {
        Self::hang_up_unresolvable(self.matcher.agent_accepted(call_id, agent_id).await)
    }

    pub async fn start_campaign(&self, id: CampaignId) -> Result<usize> {
        self.campaigns.start_campaign(id).await
    }

    pub async fn pause_campaign(&self, id: CampaignId) -> Result<Campaign> {
        self.campaigns.pause_campaign(id).await
    }

    /// Agent presence change from the agent-facing surface
    pub async fn set_agent_status(&self, id: AgentId, status: AgentStatus) -> Result<Agent> {
        let agent = self
            .repos
            .agents
            .set_status(id, status)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("agent {}", id)))?;

        info!("Agent {} is now {}", id, status.as_str());
        self.events.publish(DialerEvent::AgentStatusChanged {
            agent_id: agent.id,
            status: agent.status,
            current_calls: agent.current_calls,
            timestamp: now_ts(),
        });
        Ok(agent)
    }

    pub async fn get_call(&self, id: CallId) -> Result<Option<Call>> {
        self.repos.calls.get(id).await
    }

    pub async fn stats(&self, campaign_id: Option<CampaignId>) -> Result<DialerStats> {
        let calls = self.repos.calls.stats(campaign_id).await?;
        let queue_depth = self.queue.depth(campaign_id).await?;
        Ok(DialerStats { calls, queue_depth })
    }

    fn drop_unresolvable(result: DialerResult<()>) -> DialerResult<()> {
        match result {
            Err(DialerError::UnknownCorrelationId(id)) => {
                counter!("dialer_events_dropped_total", "reason" => "unknown_correlation_id")
                    .increment(1);
                warn!("Dropping event for unknown call: {}", id);
                Ok(())
            }
            other => other,
        }
    }

    fn hang_up_unresolvable(
        result: DialerResult<Vec<CallInstruction>>,
    ) -> DialerResult<Vec<CallInstruction>> {
        match result {
            Err(DialerError::UnknownCorrelationId(id)) => {
                counter!("dialer_events_dropped_total", "reason" => "unknown_correlation_id")
                    .increment(1);
                warn!("Agent callback for unknown call {}, hanging up", id);
                Ok(vec![CallInstruction::Hangup])
            }
            other => other,
        }
    }
}
