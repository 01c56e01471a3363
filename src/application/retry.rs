//! Retry scheduler
//!
//! Fixed-delay policy with a hard attempt cutoff. Attempts are counted when a
//! lead is claimed for dialling, so a provider rejection counts too.

use crate::application::call_queue::CallQueue;
use crate::application::events::{now_ts, DialerEvent, EventBus};
use crate::domain::campaign::CampaignRepository;
use crate::domain::lead::{LeadRepository, LeadStatus};
use crate::domain::shared::{DomainError, LeadId, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { next_call_at: DateTime<Utc> },
    Exhausted { call_attempts: u32 },
}

pub struct RetryScheduler {
    leads: Arc<dyn LeadRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    queue: Arc<CallQueue>,
    events: Arc<EventBus>,
}

impl RetryScheduler {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        queue: Arc<CallQueue>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            leads,
            campaigns,
            queue,
            events,
        }
    }

    /// Re-queue the lead after a non-success outcome, or close it out once
    /// the campaign's attempt budget is spent
    pub async fn schedule_or_complete(&self, lead_id: LeadId) -> Result<RetryDecision> {
        let lead = self
            .leads
            .get(lead_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("lead {}", lead_id)))?;
        let campaign = self
            .campaigns
            .get(lead.campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", lead.campaign_id)))?;

        let policy = campaign.retry_policy;
        if policy.is_exhausted(lead.call_attempts) {
            self.leads.set_status(lead.id, LeadStatus::Completed).await?;
            counter!("dialer_leads_exhausted_total").increment(1);
            info!(
                "Lead {} exhausted after {} attempts",
                lead.id, lead.call_attempts
            );
            self.events.publish(DialerEvent::LeadExhausted {
                lead_id: lead.id,
                call_attempts: lead.call_attempts,
                timestamp: now_ts(),
            });
            return Ok(RetryDecision::Exhausted {
                call_attempts: lead.call_attempts,
            });
        }

        let next_call_at = Utc::now() + policy.delay().max(chrono::Duration::minutes(1));
        self.leads.mark_queued(lead.id, next_call_at).await?;
        self.queue.enqueue(&lead, next_call_at, lead.priority).await?;
        counter!("dialer_retries_scheduled_total").increment(1);
        info!(
            "Lead {} retry {} of {} scheduled for {}",
            lead.id,
            lead.call_attempts + 1,
            policy.max_attempts,
            next_call_at
        );
        self.events.publish(DialerEvent::RetryScheduled {
            lead_id: lead.id,
            next_call_at,
            timestamp: now_ts(),
        });

        Ok(RetryDecision::Scheduled { next_call_at })
    }
}
