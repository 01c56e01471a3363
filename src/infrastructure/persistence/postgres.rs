//! PostgreSQL store
//!
//! Every claim is a single conditional statement: lead claims and agent
//! reservations are `UPDATE ... WHERE <still eligible>`, queue claims use
//! `FOR UPDATE SKIP LOCKED`, and call updates compare `version`.

use crate::domain::agent::{Agent, AgentRepository, AgentStatus};
use crate::domain::call::{
    AnsweredBy, Call, CallDirection, CallPhase, CallRepository, CallStats, CallStatus, Disposition,
};
use crate::domain::call_queue::{QueueEntry, QueueRepository};
use crate::domain::campaign::{
    CallingHours, Campaign, CampaignRepository, CampaignStatus, RetryPolicy,
};
use crate::domain::conference::ConferenceName;
use crate::domain::lead::{Lead, LeadPriority, LeadRepository, LeadStatus};
use crate::domain::shared::{
    AgentGroupId, AgentId, CallId, CampaignId, DomainError, LeadId, ProviderCallId, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

const CAMPAIGN_COLUMNS: &str = "id, name, status, caller_id, calling_hours_start, \
    calling_hours_end, timezone, schedule_start, schedule_end, max_attempts, \
    retry_delay_minutes, agent_group_id, amd_enabled, record_calls, voicemail_message_url, \
    calls_made, calls_completed, created_at";

const LEAD_COLUMNS: &str = "id, campaign_id, phone, first_name, last_name, priority, status, \
    call_attempts, next_call_at, last_call_at, created_at";

const AGENT_COLUMNS: &str = "id, name, phone, group_id, status, is_active, current_calls, \
    max_concurrent_calls, total_calls_handled, total_call_duration_seconds, last_active_at";

const CALL_COLUMNS: &str = "id, campaign_id, lead_id, agent_id, provider_call_id, direction, \
    status, disposition, answered_by, phase, agent_leg, tried_agents, conference, recording, \
    conference_events, retry_scheduled, started_at, answered_at, ended_at, duration_seconds, \
    version";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    error!("Failed to {}: {}", context, e);
    DomainError::Storage(format!("{}: {}", context, e))
}

fn decode_error(e: sqlx::Error) -> DomainError {
    DomainError::Storage(format!("row decode: {}", e))
}

fn invalid_column(column: &str, value: &str) -> DomainError {
    DomainError::Storage(format!("invalid {} value '{}'", column, value))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| DomainError::Internal(e.to_string()))
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| DomainError::Storage(e.to_string()))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn row_to_campaign(row: &PgRow) -> Result<Campaign> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let timezone: String = row.try_get("timezone").map_err(decode_error)?;
    let start: Option<NaiveTime> = row.try_get("calling_hours_start").map_err(decode_error)?;
    let end: Option<NaiveTime> = row.try_get("calling_hours_end").map_err(decode_error)?;
    let group: Option<Uuid> = row.try_get("agent_group_id").map_err(decode_error)?;

    Ok(Campaign {
        id: CampaignId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        status: CampaignStatus::from_str(&status)
            .ok_or_else(|| invalid_column("campaign status", &status))?,
        caller_id: row.try_get("caller_id").map_err(decode_error)?,
        calling_hours: start.zip(end).map(|(start, end)| CallingHours::new(start, end)),
        timezone: timezone
            .parse::<Tz>()
            .map_err(|_| invalid_column("timezone", &timezone))?,
        schedule_start: row.try_get("schedule_start").map_err(decode_error)?,
        schedule_end: row.try_get("schedule_end").map_err(decode_error)?,
        retry_policy: RetryPolicy {
            max_attempts: to_u32(row.try_get("max_attempts").map_err(decode_error)?),
            delay_minutes: to_u32(row.try_get("retry_delay_minutes").map_err(decode_error)?),
        },
        agent_group_id: group.map(AgentGroupId::from_uuid),
        amd_enabled: row.try_get("amd_enabled").map_err(decode_error)?,
        record_calls: row.try_get("record_calls").map_err(decode_error)?,
        voicemail_message_url: row.try_get("voicemail_message_url").map_err(decode_error)?,
        calls_made: row.try_get("calls_made").map_err(decode_error)?,
        calls_completed: row.try_get("calls_completed").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn row_to_lead(row: &PgRow) -> Result<Lead> {
    let priority: String = row.try_get("priority").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;

    Ok(Lead {
        id: LeadId::from_uuid(row.try_get("id").map_err(decode_error)?),
        campaign_id: CampaignId::from_uuid(row.try_get("campaign_id").map_err(decode_error)?),
        phone: row.try_get("phone").map_err(decode_error)?,
        first_name: row.try_get("first_name").map_err(decode_error)?,
        last_name: row.try_get("last_name").map_err(decode_error)?,
        priority: LeadPriority::from_str(&priority)
            .ok_or_else(|| invalid_column("lead priority", &priority))?,
        status: LeadStatus::from_str(&status)
            .ok_or_else(|| invalid_column("lead status", &status))?,
        call_attempts: to_u32(row.try_get("call_attempts").map_err(decode_error)?),
        next_call_at: row.try_get("next_call_at").map_err(decode_error)?,
        last_call_at: row.try_get("last_call_at").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn row_to_agent(row: &PgRow) -> Result<Agent> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let group: Option<Uuid> = row.try_get("group_id").map_err(decode_error)?;

    Ok(Agent {
        id: AgentId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        phone: row.try_get("phone").map_err(decode_error)?,
        group_id: group.map(AgentGroupId::from_uuid),
        status: AgentStatus::from_str(&status)
            .ok_or_else(|| invalid_column("agent status", &status))?,
        is_active: row.try_get("is_active").map_err(decode_error)?,
        current_calls: to_u32(row.try_get("current_calls").map_err(decode_error)?),
        max_concurrent_calls: to_u32(row.try_get("max_concurrent_calls").map_err(decode_error)?),
        total_calls_handled: row.try_get("total_calls_handled").map_err(decode_error)?,
        total_call_duration_seconds: row
            .try_get("total_call_duration_seconds")
            .map_err(decode_error)?,
        last_active_at: row.try_get("last_active_at").map_err(decode_error)?,
    })
}

fn row_to_call(row: &PgRow) -> Result<Call> {
    let direction: String = row.try_get("direction").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let phase: String = row.try_get("phase").map_err(decode_error)?;
    let disposition: Option<String> = row.try_get("disposition").map_err(decode_error)?;
    let answered_by: Option<String> = row.try_get("answered_by").map_err(decode_error)?;
    let agent_id: Option<Uuid> = row.try_get("agent_id").map_err(decode_error)?;
    let provider_call_id: Option<String> = row.try_get("provider_call_id").map_err(decode_error)?;
    let conference: Option<String> = row.try_get("conference").map_err(decode_error)?;
    let agent_leg: Option<serde_json::Value> = row.try_get("agent_leg").map_err(decode_error)?;
    let recording: Option<serde_json::Value> = row.try_get("recording").map_err(decode_error)?;

    let disposition = match disposition {
        Some(d) => Some(Disposition::from_str(&d).ok_or_else(|| invalid_column("disposition", &d))?),
        None => None,
    };

    Ok(Call {
        id: CallId::from_uuid(row.try_get("id").map_err(decode_error)?),
        campaign_id: CampaignId::from_uuid(row.try_get("campaign_id").map_err(decode_error)?),
        lead_id: LeadId::from_uuid(row.try_get("lead_id").map_err(decode_error)?),
        agent_id: agent_id.map(AgentId::from_uuid),
        provider_call_id: provider_call_id.map(ProviderCallId::new),
        direction: CallDirection::from_str(&direction)
            .ok_or_else(|| invalid_column("direction", &direction))?,
        status: CallStatus::parse(&status).ok_or_else(|| invalid_column("call status", &status))?,
        disposition,
        answered_by: answered_by.as_deref().map(AnsweredBy::parse),
        phase: CallPhase::from_str(&phase).ok_or_else(|| invalid_column("phase", &phase))?,
        agent_leg: agent_leg.map(from_json).transpose()?,
        tried_agents: from_json(row.try_get("tried_agents").map_err(decode_error)?)?,
        conference: conference.map(ConferenceName::from_string),
        recording: recording.map(from_json).transpose()?,
        conference_events: from_json(row.try_get("conference_events").map_err(decode_error)?)?,
        retry_scheduled: row.try_get("retry_scheduled").map_err(decode_error)?,
        started_at: row.try_get("started_at").map_err(decode_error)?,
        answered_at: row.try_get("answered_at").map_err(decode_error)?,
        ended_at: row.try_get("ended_at").map_err(decode_error)?,
        duration_seconds: row.try_get("duration_seconds").map_err(decode_error)?,
        version: row.try_get("version").map_err(decode_error)?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<QueueEntry> {
    let priority: String = row.try_get("priority").map_err(decode_error)?;
    Ok(QueueEntry {
        campaign_id: CampaignId::from_uuid(row.try_get("campaign_id").map_err(decode_error)?),
        lead_id: LeadId::from_uuid(row.try_get("lead_id").map_err(decode_error)?),
        scheduled_at: row.try_get("scheduled_at").map_err(decode_error)?,
        priority: LeadPriority::from_str(&priority)
            .ok_or_else(|| invalid_column("queue priority", &priority))?,
    })
}

#[async_trait]
impl CampaignRepository for PgStore {
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM campaigns WHERE id = $1",
            CAMPAIGN_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get campaign", e))?;

        row.as_ref().map(row_to_campaign).transpose()
    }

    async fn save(&self, campaign: &Campaign) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaigns
            (id, name, status, caller_id, calling_hours_start, calling_hours_end, timezone,
             schedule_start, schedule_end, max_attempts, retry_delay_minutes, agent_group_id,
             amd_enabled, record_calls, voicemail_message_url, calls_made, calls_completed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                caller_id = EXCLUDED.caller_id,
                calling_hours_start = EXCLUDED.calling_hours_start,
                calling_hours_end = EXCLUDED.calling_hours_end,
                timezone = EXCLUDED.timezone,
                schedule_start = EXCLUDED.schedule_start,
                schedule_end = EXCLUDED.schedule_end,
                max_attempts = EXCLUDED.max_attempts,
                retry_delay_minutes = EXCLUDED.retry_delay_minutes,
                agent_group_id = EXCLUDED.agent_group_id,
                amd_enabled = EXCLUDED.amd_enabled,
                record_calls = EXCLUDED.record_calls,
                voicemail_message_url = EXCLUDED.voicemail_message_url
            "#,
        )
        .bind(campaign.id.as_uuid())
        .bind(&campaign.name)
        .bind(campaign.status.as_str())
        .bind(&campaign.caller_id)
        .bind(campaign.calling_hours.map(|h| h.start))
        .bind(campaign.calling_hours.map(|h| h.end))
        .bind(campaign.timezone.name())
        .bind(campaign.schedule_start)
        .bind(campaign.schedule_end)
        .bind(to_i32(campaign.retry_policy.max_attempts))
        .bind(to_i32(campaign.retry_policy.delay_minutes))
        .bind(campaign.agent_group_id.map(|g| g.as_uuid()))
        .bind(campaign.amd_enabled)
        .bind(campaign.record_calls)
        .bind(campaign.voicemail_message_url.as_ref())
        .bind(campaign.calls_made)
        .bind(campaign.calls_completed)
        .bind(campaign.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Saved campaign: {}", campaign.id);
                Ok(())
            }
            Err(e) => Err(db_error("save campaign", e)),
        }
    }

    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<Option<Campaign>> {
        let row = sqlx::query(&format!(
            "UPDATE campaigns SET status = $2 WHERE id = $1 RETURNING {}",
            CAMPAIGN_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("set campaign status", e))?;

        row.as_ref().map(row_to_campaign).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM campaigns WHERE status = 'active' ORDER BY created_at",
            CAMPAIGN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list active campaigns", e))?;

        rows.iter().map(row_to_campaign).collect()
    }

    async fn increment_calls_made(&self, id: CampaignId) -> Result<()> {
        sqlx::query("UPDATE campaigns SET calls_made = calls_made + 1 WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("increment calls_made", e))?;
        Ok(())
    }

    async fn increment_calls_completed(&self, id: CampaignId) -> Result<()> {
        sqlx::query("UPDATE campaigns SET calls_completed = calls_completed + 1 WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("increment calls_completed", e))?;
        Ok(())
    }
}

#[async_trait]
impl LeadRepository for PgStore {
    async fn get(&self, id: LeadId) -> Result<Option<Lead>> {
        let row = sqlx::query(&format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get lead", e))?;

        row.as_ref().map(row_to_lead).transpose()
    }

    async fn save(&self, lead: &Lead) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leads
            (id, campaign_id, phone, first_name, last_name, priority, status, call_attempts,
             next_call_at, last_call_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                phone = EXCLUDED.phone,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                priority = EXCLUDED.priority,
                status = EXCLUDED.status,
                call_attempts = EXCLUDED.call_attempts,
                next_call_at = EXCLUDED.next_call_at,
                last_call_at = EXCLUDED.last_call_at
            "#,
        )
        .bind(lead.id.as_uuid())
        .bind(lead.campaign_id.as_uuid())
        .bind(&lead.phone)
        .bind(lead.first_name.as_ref())
        .bind(lead.last_name.as_ref())
        .bind(lead.priority.as_str())
        .bind(lead.status.as_str())
        .bind(to_i32(lead.call_attempts))
        .bind(lead.next_call_at)
        .bind(lead.last_call_at)
        .bind(lead.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("save lead", e))?;

        debug!("Saved lead: {}", lead.id);
        Ok(())
    }

    async fn try_mark_calling(&self, id: LeadId, now: DateTime<Utc>) -> Result<Option<Lead>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE leads
            SET status = 'calling', call_attempts = call_attempts + 1, last_call_at = $2
            WHERE id = $1 AND status IN ('pending', 'queued')
            RETURNING {}
            "#,
            LEAD_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("claim lead", e))?;

        if row.is_none() {
            debug!("Lead {} not claimable", id);
        }
        row.as_ref().map(row_to_lead).transpose()
    }

    async fn set_status(&self, id: LeadId, status: LeadStatus) -> Result<()> {
        let result = sqlx::query("UPDATE leads SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("set lead status", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("lead {}", id)));
        }
        Ok(())
    }

    async fn mark_queued(&self, id: LeadId, next_call_at: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE leads SET status = 'queued', next_call_at = $2 WHERE id = $1")
                .bind(id.as_uuid())
                .bind(next_call_at)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("queue lead", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("lead {}", id)));
        }
        Ok(())
    }

    async fn find_pending(&self, campaign_id: CampaignId) -> Result<Vec<Lead>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leads WHERE campaign_id = $1 AND status = 'pending' ORDER BY created_at",
            LEAD_COLUMNS
        ))
        .bind(campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("find pending leads", e))?;

        rows.iter().map(row_to_lead).collect()
    }
}

#[async_trait]
impl AgentRepository for PgStore {
    async fn get(&self, id: AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get agent", e))?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn save(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents
            (id, name, phone, group_id, status, is_active, current_calls, max_concurrent_calls,
             total_calls_handled, total_call_duration_seconds, last_active_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                group_id = EXCLUDED.group_id,
                status = EXCLUDED.status,
                is_active = EXCLUDED.is_active,
                max_concurrent_calls = EXCLUDED.max_concurrent_calls,
                last_active_at = EXCLUDED.last_active_at
            "#,
        )
        .bind(agent.id.as_uuid())
        .bind(&agent.name)
        .bind(&agent.phone)
        .bind(agent.group_id.map(|g| g.as_uuid()))
        .bind(agent.status.as_str())
        .bind(agent.is_active)
        .bind(to_i32(agent.current_calls))
        .bind(to_i32(agent.max_concurrent_calls))
        .bind(agent.total_calls_handled)
        .bind(agent.total_call_duration_seconds)
        .bind(agent.last_active_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("save agent", e))?;

        debug!("Saved agent: {}", agent.id);
        Ok(())
    }

    async fn reserve(
        &self,
        group: Option<AgentGroupId>,
        exclude: &[AgentId],
    ) -> Result<Option<Agent>> {
        let excluded: Vec<Uuid> = exclude.iter().map(|a| a.as_uuid()).collect();
        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT id FROM agents
                WHERE status = 'available'
                  AND is_active
                  AND current_calls < max_concurrent_calls
                  AND ($1::uuid IS NULL OR group_id = $1)
                  AND NOT (id = ANY($2))
                ORDER BY current_calls ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE agents a
            SET current_calls = a.current_calls + 1,
                status = CASE WHEN a.current_calls + 1 >= a.max_concurrent_calls
                              THEN 'busy' ELSE a.status END
            FROM candidate
            WHERE a.id = candidate.id
            RETURNING a.*
            "#
        )
        .bind(group.map(|g| g.as_uuid()))
        .bind(&excluded)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("reserve agent", e))?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn release(&self, id: AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE agents
            SET current_calls = GREATEST(current_calls - 1, 0),
                status = CASE WHEN status = 'busy'
                                   AND GREATEST(current_calls - 1, 0) < max_concurrent_calls
                              THEN 'available' ELSE status END
            WHERE id = $1
            RETURNING {}
            "#,
            AGENT_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("release agent", e))?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn record_completed_call(&self, id: AgentId, duration_seconds: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET total_calls_handled = total_calls_handled + 1,
                total_call_duration_seconds = total_call_duration_seconds + $2,
                last_active_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(duration_seconds.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("record agent call", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("agent {}", id)));
        }
        Ok(())
    }

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!(
            "UPDATE agents SET status = $2, last_active_at = NOW() WHERE id = $1 RETURNING {}",
            AGENT_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("set agent status", e))?;

        row.as_ref().map(row_to_agent).transpose()
    }
}

#[async_trait]
impl CallRepository for PgStore {
    async fn insert(&self, call: &Call) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO calls
            (id, campaign_id, lead_id, agent_id, provider_call_id, direction, status, disposition,
             answered_by, phase, agent_leg, tried_agents, conference, recording, conference_events,
             retry_scheduled, started_at, answered_at, ended_at, duration_seconds, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            "#,
        )
        .bind(call.id.as_uuid())
        .bind(call.campaign_id.as_uuid())
        .bind(call.lead_id.as_uuid())
        .bind(call.agent_id.map(|a| a.as_uuid()))
        .bind(call.provider_call_id.as_ref().map(|p| p.as_str().to_string()))
        .bind(call.direction.as_str())
        .bind(call.status.as_str())
        .bind(call.disposition.map(|d| d.as_str()))
        .bind(call.answered_by.map(|a| a.as_str()))
        .bind(call.phase.as_str())
        .bind(call.agent_leg.as_ref().map(to_json).transpose()?)
        .bind(to_json(&call.tried_agents)?)
        .bind(call.conference.as_ref().map(|c| c.as_str().to_string()))
        .bind(call.recording.as_ref().map(to_json).transpose()?)
        .bind(to_json(&call.conference_events)?)
        .bind(call.retry_scheduled)
        .bind(call.started_at)
        .bind(call.answered_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .bind(call.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Inserted call: {}", call.id);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                DomainError::Conflict(format!("call {} already exists", call.id)),
            ),
            Err(e) => Err(db_error("insert call", e)),
        }
    }

    async fn get(&self, id: CallId) -> Result<Option<Call>> {
        let row = sqlx::query(&format!("SELECT {} FROM calls WHERE id = $1", CALL_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get call", e))?;

        row.as_ref().map(row_to_call).transpose()
    }

    async fn find_by_provider_call_id(&self, id: &ProviderCallId) -> Result<Option<Call>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM calls WHERE provider_call_id = $1",
            CALL_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find call by provider id", e))?;

        row.as_ref().map(row_to_call).transpose()
    }

    async fn find_by_lead(&self, lead_id: LeadId) -> Result<Vec<Call>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM calls WHERE lead_id = $1 ORDER BY started_at",
            CALL_COLUMNS
        ))
        .bind(lead_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("find calls by lead", e))?;

        rows.iter().map(row_to_call).collect()
    }

    async fn update(&self, call: &Call) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls SET
                agent_id = $2,
                provider_call_id = $3,
                status = $4,
                disposition = $5,
                answered_by = $6,
                phase = $7,
                agent_leg = $8,
                tried_agents = $9,
                conference = $10,
                recording = $11,
                conference_events = $12,
                retry_scheduled = $13,
                answered_at = $14,
                ended_at = $15,
                duration_seconds = $16,
                version = version + 1
            WHERE id = $1 AND version = $17
            "#,
        )
        .bind(call.id.as_uuid())
        .bind(call.agent_id.map(|a| a.as_uuid()))
        .bind(call.provider_call_id.as_ref().map(|p| p.as_str().to_string()))
        .bind(call.status.as_str())
        .bind(call.disposition.map(|d| d.as_str()))
        .bind(call.answered_by.map(|a| a.as_str()))
        .bind(call.phase.as_str())
        .bind(call.agent_leg.as_ref().map(to_json).transpose()?)
        .bind(to_json(&call.tried_agents)?)
        .bind(call.conference.as_ref().map(|c| c.as_str().to_string()))
        .bind(call.recording.as_ref().map(to_json).transpose()?)
        .bind(to_json(&call.conference_events)?)
        .bind(call.retry_scheduled)
        .bind(call.answered_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .bind(call.version)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update call", e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM calls WHERE id = $1")
            .bind(call.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("check call version", e))?;

        match exists {
            Some(_) => {
                debug!("Call {} changed concurrently, version {} is stale", call.id, call.version);
                Ok(false)
            }
            None => Err(DomainError::NotFound(format!("call {}", call.id))),
        }
    }

    async fn stats(&self, campaign_id: Option<CampaignId>) -> Result<CallStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_calls,
                COUNT(*) FILTER (WHERE status NOT IN
                    ('completed', 'busy', 'no-answer', 'failed', 'canceled')) AS active_calls,
                COUNT(*) FILTER (WHERE disposition = 'answered') AS answered,
                COUNT(*) FILTER (WHERE disposition = 'voicemail') AS voicemail,
                COUNT(*) FILTER (WHERE disposition = 'no_answer') AS no_answer,
                COUNT(*) FILTER (WHERE disposition = 'busy') AS busy,
                COUNT(*) FILTER (WHERE disposition = 'failed') AS failed,
                COUNT(*) FILTER (WHERE disposition = 'completed') AS completed,
                COUNT(*) FILTER (WHERE answered_by = 'human') AS human_answers,
                COUNT(*) FILTER (WHERE answered_by LIKE 'machine%' OR answered_by = 'fax')
                    AS machine_answers,
                COALESCE(AVG(duration_seconds)::float8, 0) AS average_duration_seconds
            FROM calls
            WHERE ($1::uuid IS NULL OR campaign_id = $1)
            "#,
        )
        .bind(campaign_id.map(|c| c.as_uuid()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("compute call stats", e))?;

        Ok(CallStats {
            total_calls: row.try_get("total_calls").map_err(decode_error)?,
            active_calls: row.try_get("active_calls").map_err(decode_error)?,
            answered: row.try_get("answered").map_err(decode_error)?,
            voicemail: row.try_get("voicemail").map_err(decode_error)?,
            no_answer: row.try_get("no_answer").map_err(decode_error)?,
            busy: row.try_get("busy").map_err(decode_error)?,
            failed: row.try_get("failed").map_err(decode_error)?,
            completed: row.try_get("completed").map_err(decode_error)?,
            human_answers: row.try_get("human_answers").map_err(decode_error)?,
            machine_answers: row.try_get("machine_answers").map_err(decode_error)?,
            average_duration_seconds: row
                .try_get("average_duration_seconds")
                .map_err(decode_error)?,
        })
    }
}

#[async_trait]
impl QueueRepository for PgStore {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO call_queue (lead_id, campaign_id, scheduled_at, priority, priority_score)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (lead_id) DO UPDATE SET
                campaign_id = EXCLUDED.campaign_id,
                scheduled_at = EXCLUDED.scheduled_at,
                priority = EXCLUDED.priority,
                priority_score = EXCLUDED.priority_score
            "#,
        )
        .bind(entry.lead_id.as_uuid())
        .bind(entry.campaign_id.as_uuid())
        .bind(entry.scheduled_at)
        .bind(entry.priority.as_str())
        .bind(entry.priority_score())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("enqueue lead", e))?;

        debug!("Queued lead {} for {}", entry.lead_id, entry.scheduled_at);
        Ok(())
    }

    async fn claim_due(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r#"
            DELETE FROM call_queue
            WHERE lead_id IN (
                SELECT lead_id FROM call_queue
                WHERE campaign_id = $1 AND scheduled_at <= $2
                ORDER BY priority_score DESC, scheduled_at ASC, lead_id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING campaign_id, lead_id, scheduled_at, priority
            "#,
        )
        .bind(campaign_id.as_uuid())
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("claim queue entries", e))?;

        let mut entries = rows.iter().map(row_to_entry).collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified
        entries.sort_by(|a, b| a.dispatch_order(b));
        Ok(entries)
    }

    async fn find_entry(&self, lead_id: LeadId) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(
            "SELECT campaign_id, lead_id, scheduled_at, priority FROM call_queue WHERE lead_id = $1",
        )
        .bind(lead_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find queue entry", e))?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn depth(&self, campaign_id: Option<CampaignId>) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM call_queue WHERE ($1::uuid IS NULL OR campaign_id = $1)",
        )
        .bind(campaign_id.map(|c| c.as_uuid()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("count queue entries", e))
    }
}
