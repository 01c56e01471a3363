//! In-memory store
//!
//! Implements every repository port over one lock, so each operation is
//! atomic with respect to every other. Used when no database is configured
//! and by the tests.

use crate::domain::agent::{Agent, AgentRepository, AgentStatus};
use crate::domain::call::{Call, CallRepository, CallStats};
use crate::domain::call_queue::{QueueEntry, QueueRepository};
use crate::domain::campaign::{Campaign, CampaignRepository, CampaignStatus};
use crate::domain::lead::{Lead, LeadRepository, LeadStatus};
use crate::domain::shared::{
    AgentGroupId, AgentId, CallId, CampaignId, DomainError, LeadId, ProviderCallId, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<CampaignId, Campaign>,
    leads: HashMap<LeadId, Lead>,
    // ordered so ties in the matcher resolve to the lowest id
    agents: BTreeMap<AgentId, Agent>,
    calls: HashMap<CallId, Call>,
    queue: HashMap<LeadId, QueueEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        self.state.write().await.campaigns.insert(campaign.id, campaign);
    }

    pub async fn insert_lead(&self, lead: Lead) {
        self.state.write().await.leads.insert(lead.id, lead);
    }

    pub async fn insert_agent(&self, agent: Agent) {
        self.state.write().await.agents.insert(agent.id, agent);
    }

    pub async fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.state.read().await.campaigns.get(&id).cloned()
    }

    pub async fn lead(&self, id: LeadId) -> Option<Lead> {
        self.state.read().await.leads.get(&id).cloned()
    }

    pub async fn agent(&self, id: AgentId) -> Option<Agent> {
        self.state.read().await.agents.get(&id).cloned()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.read().await.calls.values().cloned().collect()
    }

    pub async fn queue_entries(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> =
            self.state.read().await.queue.values().cloned().collect();
        entries.sort_by(|a, b| a.dispatch_order(b));
        entries
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.campaign(id).await)
    }

    async fn save(&self, campaign: &Campaign) -> Result<()> {
        campaign.retry_policy.validate()?;
        self.insert_campaign(campaign.clone()).await;
        Ok(())
    }

    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        Ok(state.campaigns.get_mut(&id).map(|campaign| {
            campaign.status = status;
            campaign.clone()
        }))
    }

    async fn list_active(&self) -> Result<Vec<Campaign>> {
        Ok(self
            .state
            .read()
            .await
            .campaigns
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect())
    }

    async fn increment_calls_made(&self, id: CampaignId) -> Result<()> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", id)))?;
        campaign.calls_made += 1;
        Ok(())
    }

    async fn increment_calls_completed(&self, id: CampaignId) -> Result<()> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", id)))?;
        campaign.calls_completed += 1;
        Ok(())
    }
}

#[async_trait]
impl LeadRepository for MemoryStore {
    async fn get(&self, id: LeadId) -> Result<Option<Lead>> {
        Ok(self.lead(id).await)
    }

    async fn save(&self, lead: &Lead) -> Result<()> {
        self.insert_lead(lead.clone()).await;
        Ok(())
    }

    async fn try_mark_calling(&self, id: LeadId, now: DateTime<Utc>) -> Result<Option<Lead>> {
        let mut state = self.state.write().await;
        let Some(lead) = state.leads.get_mut(&id) else {
            return Ok(None);
        };
        if !lead.status.is_dialable() {
            debug!("Lead {} is {}, not claimable", id, lead.status.as_str());
            return Ok(None);
        }
        lead.status = LeadStatus::Calling;
        lead.call_attempts += 1;
        lead.last_call_at = Some(now);
        Ok(Some(lead.clone()))
    }

    async fn set_status(&self, id: LeadId, status: LeadStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let lead = state
            .leads
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("lead {}", id)))?;
        lead.status = status;
        Ok(())
    }

    async fn mark_queued(&self, id: LeadId, next_call_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let lead = state
            .leads
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("lead {}", id)))?;
        lead.status = LeadStatus::Queued;
        lead.next_call_at = Some(next_call_at);
        Ok(())
    }

    async fn find_pending(&self, campaign_id: CampaignId) -> Result<Vec<Lead>> {
        let mut leads: Vec<Lead> = self
            .state
            .read()
            .await
            .leads
            .values()
            .filter(|l| l.campaign_id == campaign_id && l.status == LeadStatus::Pending)
            .cloned()
            .collect();
        leads.sort_by_key(|l| l.created_at);
        Ok(leads)
    }
}

#[async_trait]
impl AgentRepository for MemoryStore {
    async fn get(&self, id: AgentId) -> Result<Option<Agent>> {
        Ok(self.agent(id).await)
    }

    async fn save(&self, agent: &Agent) -> Result<()> {
        self.insert_agent(agent.clone()).await;
        Ok(())
    }

    async fn reserve(
        &self,
        group: Option<AgentGroupId>,
        exclude: &[AgentId],
    ) -> Result<Option<Agent>> {
        let mut state = self.state.write().await;
        let chosen = state
            .agents
            .values()
            .filter(|a| a.is_eligible(group) && !exclude.contains(&a.id))
            .min_by_key(|a| a.current_calls)
            .map(|a| a.id);

        Ok(chosen.and_then(|id| {
            state.agents.get_mut(&id).map(|agent| {
                agent.reserve();
                agent.clone()
            })
        }))
    }

    async fn release(&self, id: AgentId) -> Result<Option<Agent>> {
        let mut state = self.state.write().await;
        Ok(state.agents.get_mut(&id).map(|agent| {
            agent.release();
            agent.clone()
        }))
    }

    async fn record_completed_call(&self, id: AgentId, duration_seconds: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("agent {}", id)))?;
        agent.total_calls_handled += 1;
        agent.total_call_duration_seconds += duration_seconds.max(0);
        agent.last_active_at = Some(Utc::now());
        Ok(())
    }

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<Option<Agent>> {
        let mut state = self.state.write().await;
        Ok(state.agents.get_mut(&id).map(|agent| {
            agent.status = status;
            agent.last_active_at = Some(Utc::now());
            agent.clone()
        }))
    }
}

#[async_trait]
impl CallRepository for MemoryStore {
    async fn insert(&self, call: &Call) -> Result<()> {
        let mut state = self.state.write().await;
        if state.calls.contains_key(&call.id) {
            return Err(DomainError::Conflict(format!("call {} already exists", call.id)));
        }
        state.calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn get(&self, id: CallId) -> Result<Option<Call>> {
        Ok(self.state.read().await.calls.get(&id).cloned())
    }

    async fn find_by_provider_call_id(&self, id: &ProviderCallId) -> Result<Option<Call>> {
        Ok(self
            .state
            .read()
            .await
            .calls
            .values()
            .find(|c| c.provider_call_id.as_ref() == Some(id))
            .cloned())
    }

    async fn find_by_lead(&self, lead_id: LeadId) -> Result<Vec<Call>> {
        let mut calls: Vec<Call> = self
            .state
            .read()
            .await
            .calls
            .values()
            .filter(|c| c.lead_id == lead_id)
            .cloned()
            .collect();
        calls.sort_by_key(|c| c.started_at);
        Ok(calls)
    }

    async fn update(&self, call: &Call) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(stored) = state.calls.get_mut(&call.id) else {
            return Err(DomainError::NotFound(format!("call {}", call.id)));
        };
        if stored.version != call.version {
            return Ok(false);
        }
        *stored = call.clone();
        stored.version += 1;
        Ok(true)
    }

    async fn stats(&self, campaign_id: Option<CampaignId>) -> Result<CallStats> {
        let state = self.state.read().await;
        Ok(CallStats::from_calls(
            state
                .calls
                .values()
                .filter(|c| campaign_id.map_or(true, |id| c.campaign_id == id)),
        ))
    }
}

#[async_trait]
impl QueueRepository for MemoryStore {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        self.state
            .write()
            .await
            .queue
            .insert(entry.lead_id, entry.clone());
        Ok(())
    }

    async fn claim_due(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut state = self.state.write().await;
        let mut due: Vec<QueueEntry> = state
            .queue
            .values()
            .filter(|e| e.campaign_id == campaign_id && e.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.dispatch_order(b));
        due.truncate(limit);

        for entry in &due {
            state.queue.remove(&entry.lead_id);
        }
        Ok(due)
    }

    async fn find_entry(&self, lead_id: LeadId) -> Result<Option<QueueEntry>> {
        Ok(self.state.read().await.queue.get(&lead_id).cloned())
    }

    async fn depth(&self, campaign_id: Option<CampaignId>) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .queue
            .values()
            .filter(|e| campaign_id.map_or(true, |id| e.campaign_id == id))
            .count() as i64)
    }
}
