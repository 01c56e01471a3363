//! Call repository interface

use crate::domain::call::aggregate::Call;
use crate::domain::call::value_object::Disposition;
use crate::domain::shared::{CallId, CampaignId, LeadId, ProviderCallId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Aggregate call outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    pub total_calls: i64,
    pub active_calls: i64,
    pub answered: i64,
    pub voicemail: i64,
    pub no_answer: i64,
    pub busy: i64,
    pub failed: i64,
    pub completed: i64,
    pub human_answers: i64,
    pub machine_answers: i64,
    pub average_duration_seconds: f64,
}

impl CallStats {
    /// Fold a set of calls into statistics
    pub fn from_calls<'a>(calls: impl IntoIterator<Item = &'a Call>) -> Self {
        let mut stats = CallStats::default();
        let mut duration_total = 0i64;
        let mut duration_count = 0i64;

        for call in calls {
            stats.total_calls += 1;
            if !call.is_terminal() {
                stats.active_calls += 1;
            }
            match call.disposition {
                Some(Disposition::Answered) => stats.answered += 1,
                Some(Disposition::Voicemail) => stats.voicemail += 1,
                Some(Disposition::NoAnswer) => stats.no_answer += 1,
                Some(Disposition::Busy) => stats.busy += 1,
                Some(Disposition::Failed) => stats.failed += 1,
                Some(Disposition::Completed) => stats.completed += 1,
                None => {}
            }
            match call.answered_by {
                Some(by) if by.is_human() => stats.human_answers += 1,
                Some(by) if by.is_machine() => stats.machine_answers += 1,
                _ => {}
            }
            if let Some(duration) = call.duration_seconds {
                duration_total += duration;
                duration_count += 1;
            }
        }

        if duration_count > 0 {
            stats.average_duration_seconds = duration_total as f64 / duration_count as f64;
        }
        stats
    }
}

/// Repository interface for call records
///
/// Updates are compare-and-swap on `Call::version` so concurrent event
/// handlers for the same call never overwrite each other.
#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn insert(&self, call: &Call) -> Result<()>;

    async fn get(&self, id: CallId) -> Result<Option<Call>>;

    async fn find_by_provider_call_id(&self, id: &ProviderCallId) -> Result<Option<Call>>;

    async fn find_by_lead(&self, lead_id: LeadId) -> Result<Vec<Call>>;

    /// Store `call` if the stored version still equals `call.version`.
    /// Returns `false` on a version conflict. The stored version is bumped.
    async fn update(&self, call: &Call) -> Result<bool>;

    async fn stats(&self, campaign_id: Option<CampaignId>) -> Result<CallStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::value_object::{AnsweredBy, CallStatus};
    use chrono::Utc;

    #[test]
    fn test_stats_from_calls() {
        let campaign = CampaignId::new();
        let now = Utc::now();

        let mut human = Call::new(campaign, LeadId::new());
        human.apply_answer_detection(AnsweredBy::Human, now);
        human.apply_status(CallStatus::Completed, Some(60), now);

        let mut machine = Call::new(campaign, LeadId::new());
        machine.apply_answer_detection(AnsweredBy::MachineEndBeep, now);
        machine.apply_status(CallStatus::Completed, Some(20), now);

        let mut busy = Call::new(campaign, LeadId::new());
        busy.apply_status(CallStatus::Busy, Some(0), now);

        let ringing = Call::new(campaign, LeadId::new());

        let stats = CallStats::from_calls([&human, &machine, &busy, &ringing]);
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.active_calls, 1);
        assert_eq!(stats.answered, 1);
        assert_eq!(stats.voicemail, 1);
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.human_answers, 1);
        assert_eq!(stats.machine_answers, 1);
        assert!((stats.average_duration_seconds - 80.0 / 3.0).abs() < 1e-9);
    }
}
