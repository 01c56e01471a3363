//! Engine event stream

use crate::domain::agent::AgentStatus;
use crate::domain::call::{AnsweredBy, CallStatus, Disposition};
use crate::domain::shared::{AgentId, CallId, CampaignId, LeadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Things the engine did, published to live subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialerEvent {
    CallLaunched {
        call_id: CallId,
        lead_id: LeadId,
        campaign_id: CampaignId,
        timestamp: i64,
    },
    CallStatusChanged {
        call_id: CallId,
        status: CallStatus,
        timestamp: i64,
    },
    CallAnswered {
        call_id: CallId,
        answered_by: AnsweredBy,
        timestamp: i64,
    },
    TransferStarted {
        call_id: CallId,
        agent_id: AgentId,
        conference: String,
        timestamp: i64,
    },
    AgentConnected {
        call_id: CallId,
        agent_id: AgentId,
        timestamp: i64,
    },
    CallEnded {
        call_id: CallId,
        status: CallStatus,
        disposition: Disposition,
        timestamp: i64,
    },
    RetryScheduled {
        lead_id: LeadId,
        next_call_at: DateTime<Utc>,
        timestamp: i64,
    },
    LeadExhausted {
        lead_id: LeadId,
        call_attempts: u32,
        timestamp: i64,
    },
    AgentStatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
        current_calls: u32,
        timestamp: i64,
    },
}

/// Fan-out of engine events
pub struct EventBus {
    tx: broadcast::Sender<DialerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is normal.
    pub fn publish(&self, event: DialerEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let call_id = CallId::new();

        bus.publish(DialerEvent::CallStatusChanged {
            call_id,
            status: CallStatus::Ringing,
            timestamp: 0,
        });

        match rx.recv().await.unwrap() {
            DialerEvent::CallStatusChanged { call_id: id, status, .. } => {
                assert_eq!(id, call_id);
                assert_eq!(status, CallStatus::Ringing);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(DialerEvent::AgentStatusChanged {
            agent_id: AgentId::new(),
            status: AgentStatus::Break,
            current_calls: 0,
            timestamp: 1,
        })
        .unwrap();
        assert_eq!(json["type"], "agent_status_changed");
        assert_eq!(json["status"], "break");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(DialerEvent::LeadExhausted {
            lead_id: LeadId::new(),
            call_attempts: 3,
            timestamp: 0,
        });
    }
}
