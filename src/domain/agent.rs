//! Agent domain model
//!
//! `current_calls` is the only capacity counter and is mutated exclusively
//! through the atomic `reserve` / `release` repository operations.

use crate::domain::shared::{AgentGroupId, AgentId, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Offline,
    Break,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
            AgentStatus::Break => "break",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AgentStatus::Available),
            "busy" => Some(AgentStatus::Busy),
            "offline" => Some(AgentStatus::Offline),
            "break" => Some(AgentStatus::Break),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub phone: String,
    pub group_id: Option<AgentGroupId>,
    pub status: AgentStatus,
    pub is_active: bool,
    pub current_calls: u32,
    pub max_concurrent_calls: u32,
    pub total_calls_handled: i64,
    pub total_call_duration_seconds: i64,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            phone: phone.into(),
            group_id: None,
            status: AgentStatus::Offline,
            is_active: true,
            current_calls: 0,
            max_concurrent_calls: 1,
            total_calls_handled: 0,
            total_call_duration_seconds: 0,
            last_active_at: None,
        }
    }

    /// Whether the matcher may hand this agent a call from `group`
    pub fn is_eligible(&self, group: Option<AgentGroupId>) -> bool {
        self.status == AgentStatus::Available
            && self.is_active
            && self.current_calls < self.max_concurrent_calls
            && group.map_or(true, |g| self.group_id == Some(g))
    }

    /// Take one unit of capacity. Caller guarantees eligibility.
    pub fn reserve(&mut self) {
        self.current_calls = (self.current_calls + 1).min(self.max_concurrent_calls);
        if self.current_calls >= self.max_concurrent_calls {
            self.status = AgentStatus::Busy;
        }
    }

    /// Give back one unit of capacity, never going below zero
    pub fn release(&mut self) {
        self.current_calls = self.current_calls.saturating_sub(1);
        if self.status == AgentStatus::Busy && self.current_calls < self.max_concurrent_calls {
            self.status = AgentStatus::Available;
        }
    }
}

/// Repository port for agents
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get(&self, id: AgentId) -> Result<Option<Agent>>;

    async fn save(&self, agent: &Agent) -> Result<()>;

    /// Select and reserve the least-loaded eligible agent in one atomic step.
    ///
    /// Ties on `current_calls` go to the lowest id. Agents in `exclude` are
    /// skipped.
    async fn reserve(
        &self,
        group: Option<AgentGroupId>,
        exclude: &[AgentId],
    ) -> Result<Option<Agent>>;

    /// Atomically release one reservation
    async fn release(&self, id: AgentId) -> Result<Option<Agent>>;

    async fn record_completed_call(&self, id: AgentId, duration_seconds: i64) -> Result<()>;

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<Option<Agent>>;
}
