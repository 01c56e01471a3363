//! Campaign domain model
//!
//! Campaigns are owned and edited by the campaign-management surface; the
//! dialer only reads them, flips their status on start/pause and bumps the
//! call counters.

use crate::domain::shared::{AgentGroupId, CampaignId, DomainError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "scheduled" => Some(CampaignStatus::Scheduled),
            "active" => Some(CampaignStatus::Active),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            _ => None,
        }
    }
}

/// Daily window (campaign-local time) in which new calls may be placed.
///
/// `start == end` means the whole day. A window whose end is before its start
/// wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl CallingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Check a local wall-clock time against the window
    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_minutes: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_minutes: u32) -> Result<Self> {
        let policy = Self {
            max_attempts,
            delay_minutes,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DomainError::ValidationError(
                "retry policy max_attempts must be at least 1".to_string(),
            ));
        }
        if self.delay_minutes == 0 {
            return Err(DomainError::ValidationError(
                "retry policy delay_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a lead with `attempts` dials behind it may be dialled again
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.delay_minutes))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_minutes: 60,
        }
    }
}

/// Outbound calling campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    pub caller_id: String,
    pub calling_hours: Option<CallingHours>,
    pub timezone: Tz,
    pub schedule_start: Option<DateTime<Utc>>,
    pub schedule_end: Option<DateTime<Utc>>,
    pub retry_policy: RetryPolicy,
    pub agent_group_id: Option<AgentGroupId>,
    pub amd_enabled: bool,
    pub record_calls: bool,
    pub voicemail_message_url: Option<String>,
    pub calls_made: i64,
    pub calls_completed: i64,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            id: CampaignId::new(),
            name: name.into(),
            status: CampaignStatus::Draft,
            caller_id: caller_id.into(),
            calling_hours: None,
            timezone: Tz::UTC,
            schedule_start: None,
            schedule_end: None,
            retry_policy: RetryPolicy::default(),
            agent_group_id: None,
            amd_enabled: true,
            record_calls: true,
            voicemail_message_url: None,
            calls_made: 0,
            calls_completed: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    /// Check whether `now` falls inside the campaign's calling hours,
    /// evaluated in the campaign's own timezone
    pub fn within_calling_hours(&self, now: DateTime<Utc>) -> bool {
        match &self.calling_hours {
            Some(hours) => hours.contains(now.with_timezone(&self.timezone).time()),
            None => true,
        }
    }

    pub fn within_schedule(&self, now: DateTime<Utc>) -> bool {
        let started = self.schedule_start.map_or(true, |start| now >= start);
        let not_ended = self.schedule_end.map_or(true, |end| now < end);
        started && not_ended
    }

    /// Whether the queue may hand out entries for this campaign right now
    pub fn is_dialable(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.within_schedule(now) && self.within_calling_hours(now)
    }
}

/// Repository port for campaigns
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    async fn save(&self, campaign: &Campaign) -> Result<()>;

    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<Option<Campaign>>;

    async fn list_active(&self) -> Result<Vec<Campaign>>;

    /// Single-statement increment of `calls_made`
    async fn increment_calls_made(&self, id: CampaignId) -> Result<()>;

    /// Single-statement increment of `calls_completed`
    async fn increment_calls_completed(&self, id: CampaignId) -> Result<()>;
}
