//! Campaign start / pause

use crate::application::call_queue::CallQueue;
use crate::domain::campaign::{Campaign, CampaignRepository, CampaignStatus};
use crate::domain::lead::LeadRepository;
use crate::domain::shared::{CampaignId, DomainError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct CampaignService {
    campaigns: Arc<dyn CampaignRepository>,
    leads: Arc<dyn LeadRepository>,
    queue: Arc<CallQueue>,
}

impl CampaignService {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        leads: Arc<dyn LeadRepository>,
        queue: Arc<CallQueue>,
    ) -> Self {
        Self {
            campaigns,
            leads,
            queue,
        }
    }

    /// Activate a campaign and queue every lead still pending. Returns the
    /// number of leads queued.
    pub async fn start_campaign(&self, id: CampaignId) -> Result<usize> {
        let campaign = self.require(id).await?;
        if matches!(
            campaign.status,
            CampaignStatus::Completed | CampaignStatus::Cancelled
        ) {
            return Err(DomainError::InvalidStateTransition(format!(
                "campaign {} is {}",
                id,
                campaign.status.as_str()
            )));
        }

        self.campaigns.set_status(id, CampaignStatus::Active).await?;

        let now = Utc::now();
        let pending = self.leads.find_pending(id).await?;
        for lead in &pending {
            let scheduled_at = lead.next_call_at.unwrap_or(now);
            self.queue.enqueue(lead, scheduled_at, lead.priority).await?;
            self.leads.mark_queued(lead.id, scheduled_at).await?;
        }

        info!("Campaign {} started, {} leads queued", id, pending.len());
        Ok(pending.len())
    }

    /// Stop new dispatch. Calls already in flight finish normally.
    pub async fn pause_campaign(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.require(id).await?;
        if campaign.status != CampaignStatus::Active {
            return Err(DomainError::InvalidStateTransition(format!(
                "campaign {} is {}, not active",
                id,
                campaign.status.as_str()
            )));
        }

        let paused = self
            .campaigns
            .set_status(id, CampaignStatus::Paused)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", id)))?;
        info!("Campaign {} paused", id);
        Ok(paused)
    }

    async fn require(&self, id: CampaignId) -> Result<Campaign> {
        self.campaigns
            .get(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lead::{Lead, LeadPriority, LeadStatus};
    use crate::infrastructure::persistence::MemoryStore;
    use chrono::Duration;

    async fn setup() -> (Arc<MemoryStore>, CampaignService, Arc<CallQueue>, Campaign) {
        let store = Arc::new(MemoryStore::new());
        let campaign = Campaign::new("Launch", "+15550000000");
        store.insert_campaign(campaign.clone()).await;
        let queue = Arc::new(CallQueue::new(store.clone(), store.clone()));
        let service = CampaignService::new(store.clone(), store.clone(), queue.clone());
        (store, service, queue, campaign)
    }

    #[tokio::test]
    async fn test_start_queues_pending_leads() {
        let (store, service, queue, campaign) = setup().await;
        let now = Utc::now();

        let fresh = Lead::new(campaign.id, "+15554440001").with_priority(LeadPriority::Urgent);
        let mut deferred = Lead::new(campaign.id, "+15554440002");
        deferred.next_call_at = Some(now + Duration::hours(2));
        let mut done = Lead::new(campaign.id, "+15554440003");
        done.status = LeadStatus::Completed;
        for lead in [&fresh, &deferred, &done] {
            store.insert_lead(lead.clone()).await;
        }

        assert_eq!(service.start_campaign(campaign.id).await.unwrap(), 2);
        assert_eq!(
            store.campaign(campaign.id).await.unwrap().status,
            CampaignStatus::Active
        );
        assert_eq!(store.lead(fresh.id).await.unwrap().status, LeadStatus::Queued);
        assert_eq!(store.lead(done.id).await.unwrap().status, LeadStatus::Completed);

        let due = queue.dequeue_batch(campaign.id, Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].lead_id, fresh.id);
        assert_eq!(queue.depth(Some(campaign.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pause_stops_dequeue_but_keeps_entries() {
        let (store, service, queue, campaign) = setup().await;
        store
            .insert_lead(Lead::new(campaign.id, "+15554440004"))
            .await;
        service.start_campaign(campaign.id).await.unwrap();

        let paused = service.pause_campaign(campaign.id).await.unwrap();
        assert_eq!(paused.status, CampaignStatus::Paused);
        assert!(queue
            .dequeue_batch(campaign.id, Utc::now(), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(queue.depth(Some(campaign.id)).await.unwrap(), 1);

        // pausing twice is a state error
        assert!(matches!(
            service.pause_campaign(campaign.id).await,
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_campaign() {
        let (_store, service, _queue, _campaign) = setup().await;
        assert!(matches!(
            service.start_campaign(CampaignId::new()).await,
            Err(DomainError::NotFound(_))
        ));
    }
}
