//! Lead domain model

use crate::domain::shared::{CampaignId, LeadId, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lead priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl LeadPriority {
    /// Queue score, higher is dialled first
    pub fn score(&self) -> i32 {
        match self {
            LeadPriority::Urgent => 10,
            LeadPriority::High => 8,
            LeadPriority::Normal => 5,
            LeadPriority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadPriority::Low => "low",
            LeadPriority::Normal => "normal",
            LeadPriority::High => "high",
            LeadPriority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(LeadPriority::Low),
            "normal" => Some(LeadPriority::Normal),
            "high" => Some(LeadPriority::High),
            "urgent" => Some(LeadPriority::Urgent),
            _ => None,
        }
    }
}

impl Default for LeadPriority {
    fn default() -> Self {
        LeadPriority::Normal
    }
}

/// Lead status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Queued,
    Calling,
    Completed,
    Failed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::Queued => "queued",
            LeadStatus::Calling => "calling",
            LeadStatus::Completed => "completed",
            LeadStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LeadStatus::Pending),
            "queued" => Some(LeadStatus::Queued),
            "calling" => Some(LeadStatus::Calling),
            "completed" => Some(LeadStatus::Completed),
            "failed" => Some(LeadStatus::Failed),
            _ => None,
        }
    }

    /// Statuses from which a lead may be claimed for a new dial
    pub fn is_dialable(&self) -> bool {
        matches!(self, LeadStatus::Pending | LeadStatus::Queued)
    }
}

/// A vetted contact to be dialled for a campaign.
///
/// Leads arrive already phone-normalised and DNC-filtered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub campaign_id: CampaignId,
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub priority: LeadPriority,
    pub status: LeadStatus,
    pub call_attempts: u32,
    pub next_call_at: Option<DateTime<Utc>>,
    pub last_call_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(campaign_id: CampaignId, phone: impl Into<String>) -> Self {
        Self {
            id: LeadId::new(),
            campaign_id,
            phone: phone.into(),
            first_name: None,
            last_name: None,
            priority: LeadPriority::Normal,
            status: LeadStatus::Pending,
            call_attempts: 0,
            next_call_at: None,
            last_call_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: LeadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    /// Name announced to the agent, if the lead has one
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Repository port for leads
#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn get(&self, id: LeadId) -> Result<Option<Lead>>;

    async fn save(&self, lead: &Lead) -> Result<()>;

    /// Atomically move a lead from `pending|queued` to `calling`, bumping
    /// `call_attempts` and `last_call_at`. Returns `None` when the lead was
    /// not in a dialable status.
    async fn try_mark_calling(&self, id: LeadId, now: DateTime<Utc>) -> Result<Option<Lead>>;

    async fn set_status(&self, id: LeadId, status: LeadStatus) -> Result<()>;

    /// Set status `queued` and the next dial time
    async fn mark_queued(&self, id: LeadId, next_call_at: DateTime<Utc>) -> Result<()>;

    /// Leads of a campaign still waiting for their first dial
    async fn find_pending(&self, campaign_id: CampaignId) -> Result<Vec<Lead>>;
}
