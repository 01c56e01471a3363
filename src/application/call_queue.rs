//! Call queue service
//!
//! Wraps the queue store with campaign eligibility: nothing is handed out for
//! a campaign that is not active, outside its schedule or outside its
//! calling hours.

use crate::domain::call_queue::{QueueEntry, QueueRepository};
use crate::domain::campaign::CampaignRepository;
use crate::domain::lead::{Lead, LeadPriority};
use crate::domain::shared::{CampaignId, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub struct CallQueue {
    queue: Arc<dyn QueueRepository>,
    campaigns: Arc<dyn CampaignRepository>,
}

impl CallQueue {
    pub fn new(queue: Arc<dyn QueueRepository>, campaigns: Arc<dyn CampaignRepository>) -> Self {
        Self { queue, campaigns }
    }

    /// Add or replace the lead's queue entry
    pub async fn enqueue(
        &self,
        lead: &Lead,
        scheduled_at: DateTime<Utc>,
        priority: LeadPriority,
    ) -> Result<QueueEntry> {
        let entry = QueueEntry::new(lead.campaign_id, lead.id, scheduled_at, priority);
        self.queue.enqueue(&entry).await?;
        debug!(
            "Enqueued lead {} for campaign {} at {} (priority {})",
            lead.id,
            lead.campaign_id,
            scheduled_at,
            priority.score()
        );
        Ok(entry)
    }

    /// Claim up to `limit` due entries. Claimed entries belong to the caller
    /// and will not be returned again.
    pub async fn dequeue_batch(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(campaign) = self.campaigns.get(campaign_id).await? else {
            debug!("Campaign {} not found, nothing to dequeue", campaign_id);
            return Ok(Vec::new());
        };

        if !campaign.is_dialable(now) {
            debug!(
                "Campaign {} not dialable now (status {})",
                campaign_id,
                campaign.status.as_str()
            );
            return Ok(Vec::new());
        }

        let entries = self.queue.claim_due(campaign_id, now, limit).await?;
        if !entries.is_empty() {
            info!("Claimed {} queue entries for campaign {}", entries.len(), campaign_id);
        }
        Ok(entries)
    }

    pub async fn depth(&self, campaign_id: Option<CampaignId>) -> Result<i64> {
        self.queue.depth(campaign_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::{Campaign, CallingHours, CampaignStatus};
    use crate::infrastructure::persistence::MemoryStore;
    use chrono::{Duration, NaiveTime, Timelike};

    async fn setup() -> (Arc<MemoryStore>, CallQueue, Campaign) {
        let store = Arc::new(MemoryStore::new());
        let mut campaign = Campaign::new("Queue test", "+15550000000");
        campaign.status = CampaignStatus::Active;
        store.insert_campaign(campaign.clone()).await;
        let queue = CallQueue::new(store.clone(), store.clone());
        (store, queue, campaign)
    }

    #[tokio::test]
    async fn test_urgent_now_before_normal_yesterday() {
        let (_store, queue, campaign) = setup().await;
        let now = Utc::now();

        let normal = Lead::new(campaign.id, "+15551110001");
        let urgent = Lead::new(campaign.id, "+15551110002").with_priority(LeadPriority::Urgent);
        queue
            .enqueue(&normal, now - Duration::days(1), LeadPriority::Normal)
            .await
            .unwrap();
        queue.enqueue(&urgent, now, LeadPriority::Urgent).await.unwrap();

        let batch = queue.dequeue_batch(campaign.id, now, 1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].lead_id, urgent.id);

        let batch = queue.dequeue_batch(campaign.id, now, 1).await.unwrap();
        assert_eq!(batch[0].lead_id, normal.id);
    }

    #[tokio::test]
    async fn test_future_entries_are_not_due() {
        let (_store, queue, campaign) = setup().await;
        let now = Utc::now();
        let lead = Lead::new(campaign.id, "+15551110003");
        queue
            .enqueue(&lead, now + Duration::minutes(60), LeadPriority::High)
            .await
            .unwrap();

        assert!(queue.dequeue_batch(campaign.id, now, 10).await.unwrap().is_empty());
        assert_eq!(queue.depth(Some(campaign.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_paused_campaign_yields_nothing() {
        let (store, queue, campaign) = setup().await;
        let now = Utc::now();
        let lead = Lead::new(campaign.id, "+15551110004");
        queue.enqueue(&lead, now, LeadPriority::Normal).await.unwrap();

        store
            .insert_campaign(Campaign {
                status: CampaignStatus::Paused,
                ..campaign.clone()
            })
            .await;
        assert!(queue.dequeue_batch(campaign.id, now, 10).await.unwrap().is_empty());
        assert_eq!(queue.depth(Some(campaign.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outside_calling_hours_yields_nothing() {
        let (store, queue, campaign) = setup().await;
        let now = Utc::now();
        let hour = now.hour();
        // a one-hour window that starts two hours from now
        let start = NaiveTime::from_hms_opt((hour + 2) % 24, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt((hour + 3) % 24, 0, 0).unwrap();
        store
            .insert_campaign(Campaign {
                calling_hours: Some(CallingHours::new(start, end)),
                ..campaign.clone()
            })
            .await;

        let lead = Lead::new(campaign.id, "+15551110005");
        queue.enqueue(&lead, now, LeadPriority::Urgent).await.unwrap();
        assert!(queue.dequeue_batch(campaign.id, now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_is_unique_per_lead() {
        let (_store, queue, campaign) = setup().await;
        let now = Utc::now();
        let lead = Lead::new(campaign.id, "+15551110006");
        queue.enqueue(&lead, now, LeadPriority::Low).await.unwrap();
        queue.enqueue(&lead, now, LeadPriority::High).await.unwrap();

        assert_eq!(queue.depth(Some(campaign.id)).await.unwrap(), 1);
        let batch = queue.dequeue_batch(campaign.id, now, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].priority, LeadPriority::High);
    }

    #[tokio::test]
    async fn test_concurrent_dequeue_claims_once() {
        let (_store, queue, campaign) = setup().await;
        let queue = Arc::new(queue);
        let now = Utc::now();
        for i in 0..20 {
            let lead = Lead::new(campaign.id, format!("+1555200{:04}", i));
            queue.enqueue(&lead, now, LeadPriority::Normal).await.unwrap();
        }

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let campaign_id = campaign.id;
                tokio::spawn(async move { queue.dequeue_batch(campaign_id, now, 20).await.unwrap() })
            })
            .collect();

        let mut claimed = Vec::new();
        for worker in futures::future::join_all(workers).await {
            claimed.extend(worker.unwrap().into_iter().map(|e| e.lead_id));
        }
        claimed.sort();
        let before = claimed.len();
        claimed.dedup();
        assert_eq!(before, 20);
        assert_eq!(claimed.len(), 20);
    }
}
