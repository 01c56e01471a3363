//! Call queue domain model
//!
//! A queue entry is a lead waiting for a dial attempt. Entries are unique per
//! lead and are removed when claimed by the launcher.

use crate::domain::lead::{Lead, LeadPriority};
use crate::domain::shared::{CampaignId, LeadId, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub scheduled_at: DateTime<Utc>,
    pub priority: LeadPriority,
}

impl QueueEntry {
    pub fn new(
        campaign_id: CampaignId,
        lead_id: LeadId,
        scheduled_at: DateTime<Utc>,
        priority: LeadPriority,
    ) -> Self {
        Self {
            campaign_id,
            lead_id,
            scheduled_at,
            priority,
        }
    }

    pub fn for_lead(lead: &Lead, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(lead.campaign_id, lead.id, scheduled_at, lead.priority)
    }

    pub fn priority_score(&self) -> i32 {
        self.priority.score()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Dispatch order: highest priority first, then earliest scheduled,
    /// then lead id so the order is total.
    pub fn dispatch_order(&self, other: &Self) -> Ordering {
        other
            .priority_score()
            .cmp(&self.priority_score())
            .then_with(|| self.scheduled_at.cmp(&other.scheduled_at))
            .then_with(|| self.lead_id.cmp(&other.lead_id))
    }
}

/// Repository port for the queue backlog
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert or replace the entry for `entry.lead_id`
    async fn enqueue(&self, entry: &QueueEntry) -> Result<()>;

    /// Atomically remove and return up to `limit` due entries of a campaign in
    /// dispatch order. A claimed entry is never returned to another caller.
    async fn claim_due(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>>;

    async fn find_entry(&self, lead_id: LeadId) -> Result<Option<QueueEntry>>;

    /// Number of waiting entries, optionally for one campaign
    async fn depth(&self, campaign_id: Option<CampaignId>) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_beats_age() {
        let campaign = CampaignId::new();
        let now = Utc::now();
        let urgent = QueueEntry::new(campaign, LeadId::new(), now, LeadPriority::Urgent);
        let stale = QueueEntry::new(
            campaign,
            LeadId::new(),
            now - Duration::days(1),
            LeadPriority::Normal,
        );

        let mut entries = vec![stale.clone(), urgent.clone()];
        entries.sort_by(|a, b| a.dispatch_order(b));
        assert_eq!(entries[0], urgent);
        assert_eq!(entries[1], stale);
    }

    #[test]
    fn test_ties_broken_by_schedule() {
        let campaign = CampaignId::new();
        let now = Utc::now();
        let later = QueueEntry::new(campaign, LeadId::new(), now, LeadPriority::High);
        let earlier = QueueEntry::new(
            campaign,
            LeadId::new(),
            now - Duration::minutes(5),
            LeadPriority::High,
        );

        assert_eq!(earlier.dispatch_order(&later), Ordering::Less);
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let entry = QueueEntry::new(CampaignId::new(), LeadId::new(), now, LeadPriority::Low);
        assert!(entry.is_due(now));
        assert!(!entry.is_due(now - Duration::seconds(1)));
    }
}
