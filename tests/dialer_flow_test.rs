//! Dialer engine integration tests
//!
//! Drive whole call lifecycles through the engine with the in-memory store
//! and the simulated provider.

use autodialer::application::{DialerEngine, DialerEvent, DialerSettings, Dispatcher, Repositories};
use autodialer::domain::agent::{Agent, AgentStatus};
use autodialer::domain::call::{
    AgentLegEvent, AnswerDetectionEvent, AnsweredBy, Call, CallPhase, CallStatus,
    ConferenceEvent, Disposition, RecordingEvent, StatusEvent,
};
use autodialer::domain::campaign::{Campaign, RetryPolicy};
use autodialer::domain::conference::ConferenceEventKind;
use autodialer::domain::lead::{Lead, LeadStatus};
use autodialer::domain::shared::{AgentId, CallId, ProviderCallId};
use autodialer::domain::telephony::{CallInstruction, CallLeg};
use autodialer::infrastructure::persistence::MemoryStore;
use autodialer::infrastructure::telephony::{ProviderAction, SimulatedProvider};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_test::assert_ok;

struct Harness {
    store: Arc<MemoryStore>,
    provider: Arc<SimulatedProvider>,
    engine: Arc<DialerEngine>,
    dispatcher: Dispatcher,
    campaign: Campaign,
}

async fn harness(policy: RetryPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new("http://localhost:3000"));

    let mut campaign = Campaign::new("Spring renewals", "+15550000000");
    campaign.retry_policy = policy;
    store.insert_campaign(campaign.clone()).await;

    let engine = Arc::new(DialerEngine::new(
        Repositories::from_store(store.clone()),
        provider.clone(),
        DialerSettings::default(),
    ));
    let dispatcher = Dispatcher::new(engine.clone(), std::time::Duration::from_secs(1), 10);

    Harness {
        store,
        provider,
        engine,
        dispatcher,
        campaign,
    }
}

impl Harness {
    async fn add_lead(&self, phone: &str) -> Lead {
        let lead = Lead::new(self.campaign.id, phone).with_name("Jane", "Doe");
        self.store.insert_lead(lead.clone()).await;
        lead
    }

    async fn add_agent(&self, name: &str, max_concurrent_calls: u32) -> Agent {
        let mut agent = Agent::new(name, "+15557770000");
        agent.status = AgentStatus::Available;
        agent.max_concurrent_calls = max_concurrent_calls;
        self.store.insert_agent(agent.clone()).await;
        agent
    }

    /// Start the campaign and run one dispatch pass
    async fn launch_all(&self) -> usize {
        self.engine.start_campaign(self.campaign.id).await.unwrap();
        self.dispatcher.tick(Utc::now()).await.unwrap().launched
    }

    async fn call_for(&self, lead: &Lead) -> Call {
        self.store
            .calls()
            .await
            .into_iter()
            .filter(|c| c.lead_id == lead.id)
            .max_by_key(|c| c.started_at)
            .unwrap()
    }

    async fn status(&self, call: &Call, status: CallStatus) {
        self.engine
            .handle_status(StatusEvent {
                call_id: Some(call.id),
                provider_call_id: call.provider_call_id.clone().unwrap(),
                status,
                duration_seconds: None,
            })
            .await
            .unwrap();
    }

    async fn answered_by(&self, call: &Call, answered_by: AnsweredBy) {
        self.engine
            .handle_answer_detection(AnswerDetectionEvent {
                call_id: Some(call.id),
                provider_call_id: call.provider_call_id.clone().unwrap(),
                answered_by,
            })
            .await
            .unwrap();
    }

    async fn agent_leg(&self, call_id: CallId, agent_id: AgentId, status: CallStatus) {
        self.engine
            .handle_agent_leg_status(AgentLegEvent {
                call_id,
                agent_id,
                provider_call_id: None,
                status,
            })
            .await
            .unwrap();
    }

    fn agent_leg_call_id(&self, agent_id: AgentId) -> ProviderCallId {
        self.provider
            .actions()
            .into_iter()
            .find_map(|action| match action {
                ProviderAction::Placed {
                    request,
                    provider_call_id,
                } if request.leg == CallLeg::Agent { agent_id } => Some(provider_call_id),
                _ => None,
            })
            .unwrap()
    }
}

fn is_voicemail_drop(instructions: &[CallInstruction]) -> bool {
    matches!(
        instructions,
        [_, CallInstruction::Record { .. }, CallInstruction::Hangup]
    )
}

#[tokio::test]
async fn test_human_answer_is_warm_transferred_to_agent() {
    let h = harness(RetryPolicy::default()).await;
    let lead = h.add_lead("+15551110001").await;
    let agent = h.add_agent("Alice", 1).await;
    let mut events = h.engine.subscribe();

    assert_eq!(h.launch_all().await, 1);
    let call = h.call_for(&lead).await;
    let lead_leg = call.provider_call_id.clone().unwrap();

    h.status(&call, CallStatus::Ringing).await;
    h.status(&call, CallStatus::Answered).await;
    h.answered_by(&call, AnsweredBy::Human).await;

    // Lead parked in the call's conference, agent leg ringing
    let parked = h.provider.last_update(&lead_leg).unwrap();
    assert!(parked
        .iter()
        .any(|i| matches!(i, CallInstruction::JoinConference(join) if !join.end_on_exit)));
    let reserved = h.store.agent(agent.id).await.unwrap();
    assert_eq!(reserved.current_calls, 1);
    assert_eq!(reserved.status, AgentStatus::Busy);

    let agent_leg = h.agent_leg_call_id(agent.id);
    h.engine
        .handle_agent_leg_status(AgentLegEvent {
            call_id: call.id,
            agent_id: agent.id,
            provider_call_id: Some(agent_leg.clone()),
            status: CallStatus::Answered,
        })
        .await
        .unwrap();

    let whisper = h.engine.agent_answered(call.id, agent.id).await.unwrap();
    assert!(whisper
        .iter()
        .any(|i| matches!(i, CallInstruction::Gather { .. })));
    let join = h.engine.agent_accepted(call.id, agent.id).await.unwrap();
    assert!(join
        .iter()
        .any(|i| matches!(i, CallInstruction::JoinConference(_))));

    h.engine
        .handle_conference_event(ConferenceEvent {
            call_id: call.id,
            conference_id: "CF123".to_string(),
            event: ConferenceEventKind::Join,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(h.call_for(&lead).await.phase, CallPhase::Connected);

    // Agent hangs up: transfer over, lead leg ended
    h.agent_leg(call.id, agent.id, CallStatus::Completed).await;

    let done = h.call_for(&lead).await;
    assert_eq!(done.status, CallStatus::Completed);
    assert_eq!(done.disposition, Some(Disposition::Answered));
    assert!(done.conference_events.contains_key("join"));
    assert!(h.provider.ended().contains(&lead_leg));

    let lead_after = h.store.lead(lead.id).await.unwrap();
    assert_eq!(lead_after.status, LeadStatus::Completed);
    assert!(h.store.queue_entries().await.is_empty());

    let agent_after = h.store.agent(agent.id).await.unwrap();
    assert_eq!(agent_after.current_calls, 0);
    assert_eq!(agent_after.status, AgentStatus::Available);
    assert_eq!(agent_after.total_calls_handled, 1);

    let campaign = h.store.campaign(h.campaign.id).await.unwrap();
    assert_eq!(campaign.calls_made, 1);
    assert_eq!(campaign.calls_completed, 1);

    // The provider's own completion arrives afterwards and changes nothing
    h.status(&call, CallStatus::Completed).await;
    h.agent_leg(call.id, agent.id, CallStatus::Completed).await;
    let replayed = h.call_for(&lead).await;
    assert_eq!(replayed.version, done.version);
    assert_eq!(h.store.agent(agent.id).await.unwrap().current_calls, 0);
    assert_eq!(h.store.campaign(h.campaign.id).await.unwrap().calls_completed, 1);

    let mut ended = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DialerEvent::CallEnded { .. }) {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}

#[tokio::test]
async fn test_machine_answer_drops_voicemail_and_retries_once() {
    let h = harness(RetryPolicy::new(3, 60).unwrap()).await;
    let lead = h.add_lead("+15551110002").await;
    h.launch_all().await;
    let call = h.call_for(&lead).await;
    let lead_leg = call.provider_call_id.clone().unwrap();

    h.answered_by(&call, AnsweredBy::MachineEndBeep).await;
    assert!(is_voicemail_drop(&h.provider.last_update(&lead_leg).unwrap()));

    // Nothing queued while the message is still playing
    assert!(h.store.queue_entries().await.is_empty());
    assert_eq!(h.store.lead(lead.id).await.unwrap().status, LeadStatus::Calling);

    // Hangup after the message, then a duplicate detection result
    h.status(&call, CallStatus::Completed).await;
    h.answered_by(&call, AnsweredBy::Human).await;

    let queued = h.store.queue_entries().await;
    assert_eq!(queued.len(), 1);
    assert!(queued[0].scheduled_at > Utc::now() + Duration::minutes(59));
    assert!(queued[0].scheduled_at <= Utc::now() + Duration::minutes(60));

    let done = h.call_for(&lead).await;
    assert_eq!(done.status, CallStatus::Completed);
    assert_eq!(done.disposition, Some(Disposition::Voicemail));
    assert_eq!(done.answered_by, Some(AnsweredBy::MachineEndBeep));
    assert_eq!(h.store.queue_entries().await.len(), 1);

    let lead_after = h.store.lead(lead.id).await.unwrap();
    assert_eq!(lead_after.status, LeadStatus::Queued);
    assert_eq!(lead_after.call_attempts, 1);

    // Voicemail recording lands after the call ended
    h.engine
        .handle_recording(RecordingEvent {
            call_id: Some(call.id),
            provider_call_id: Some(lead_leg),
            recording_id: "RE123".to_string(),
            recording_url: "https://api.example.com/RE123".to_string(),
            duration_seconds: 14,
        })
        .await
        .unwrap();
    let recorded = h.call_for(&lead).await;
    assert_eq!(recorded.recording.unwrap().recording_id, "RE123");
}

#[tokio::test]
async fn test_lead_not_redialled_while_voicemail_is_recording() {
    let h = harness(RetryPolicy::new(3, 1).unwrap()).await;
    let lead = h.add_lead("+15551110010").await;
    h.launch_all().await;
    let first = h.call_for(&lead).await;

    h.answered_by(&first, AnsweredBy::MachineEndBeep).await;

    // Past the retry delay but the first call is still live
    let during = h
        .dispatcher
        .tick(Utc::now() + Duration::seconds(61))
        .await
        .unwrap();
    assert_eq!(during.launched, 0);
    assert_eq!(h.provider.placed().len(), 1);

    h.status(&first, CallStatus::Completed).await;
    let after = h
        .dispatcher
        .tick(Utc::now() + Duration::seconds(61))
        .await
        .unwrap();
    assert_eq!(after.launched, 1);

    let live: Vec<Call> = h
        .store
        .calls()
        .await
        .into_iter()
        .filter(|c| c.lead_id == lead.id && !c.is_terminal())
        .collect();
    assert_eq!(live.len(), 1);
    assert_ne!(live[0].id, first.id);
    assert_eq!(h.store.lead(lead.id).await.unwrap().call_attempts, 2);
}

#[tokio::test]
async fn test_no_answer_is_redialled_after_delay() {
    let h = harness(RetryPolicy::new(3, 60).unwrap()).await;
    let lead = h.add_lead("+15551110003").await;
    h.launch_all().await;
    let first = h.call_for(&lead).await;

    h.status(&first, CallStatus::Ringing).await;
    h.status(&first, CallStatus::NoAnswer).await;
    h.status(&first, CallStatus::NoAnswer).await;

    let ended = h.call_for(&lead).await;
    assert_eq!(ended.disposition, Some(Disposition::NoAnswer));
    assert!(ended.retry_scheduled);
    assert_eq!(h.store.queue_entries().await.len(), 1);

    // Not due yet
    let early = h.dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(early.launched, 0);

    let later = h
        .dispatcher
        .tick(Utc::now() + Duration::minutes(61))
        .await
        .unwrap();
    assert_eq!(later.launched, 1);

    let second = h.call_for(&lead).await;
    assert_ne!(second.id, first.id);
    assert_eq!(h.store.lead(lead.id).await.unwrap().call_attempts, 2);
    assert_eq!(h.provider.placed().len(), 2);
}

#[tokio::test]
async fn test_lead_completed_when_attempts_exhausted() {
    let h = harness(RetryPolicy::new(1, 60).unwrap()).await;
    let lead = h.add_lead("+15551110004").await;
    let mut events = h.engine.subscribe();
    h.launch_all().await;
    let call = h.call_for(&lead).await;

    h.status(&call, CallStatus::Busy).await;

    let lead_after = h.store.lead(lead.id).await.unwrap();
    assert_eq!(lead_after.status, LeadStatus::Completed);
    assert_eq!(lead_after.call_attempts, 1);
    assert!(h.store.queue_entries().await.is_empty());

    let mut exhausted = false;
    while let Ok(event) = events.try_recv() {
        if let DialerEvent::LeadExhausted { lead_id, call_attempts, .. } = event {
            assert_eq!(lead_id, lead.id);
            assert_eq!(call_attempts, 1);
            exhausted = true;
        }
    }
    assert!(exhausted);
}

#[tokio::test]
async fn test_agent_capacity_is_never_exceeded() {
    let h = harness(RetryPolicy::default()).await;
    let first_lead = h.add_lead("+15551110005").await;
    let second_lead = h.add_lead("+15551110006").await;
    let agent = h.add_agent("Bob", 1).await;

    assert_eq!(h.launch_all().await, 2);
    let first = h.call_for(&first_lead).await;
    let second = h.call_for(&second_lead).await;

    tokio::join!(
        h.answered_by(&first, AnsweredBy::Human),
        h.answered_by(&second, AnsweredBy::Human)
    );

    assert_eq!(h.store.agent(agent.id).await.unwrap().current_calls, 1);

    let calls = [h.call_for(&first_lead).await, h.call_for(&second_lead).await];
    let transferring = calls
        .iter()
        .filter(|c| c.phase == CallPhase::Transferring)
        .count();
    let voicemail: Vec<&Call> = calls
        .iter()
        .filter(|c| c.phase == CallPhase::Voicemail)
        .collect();
    assert_eq!(transferring, 1);
    assert_eq!(voicemail.len(), 1);

    // The overflow call got the voicemail drop; its retry follows the hangup
    let overflow = voicemail[0];
    let overflow_leg = overflow.provider_call_id.clone().unwrap();
    assert!(is_voicemail_drop(&h.provider.last_update(&overflow_leg).unwrap()));
    assert!(!overflow.retry_scheduled);
    assert!(h.store.queue_entries().await.is_empty());

    h.status(overflow, CallStatus::Completed).await;
    let overflow_lead = if overflow.lead_id == first_lead.id {
        &first_lead
    } else {
        &second_lead
    };
    assert!(h.call_for(overflow_lead).await.retry_scheduled);
    assert_eq!(h.store.queue_entries().await.len(), 1);
}

#[tokio::test]
async fn test_unaccepted_agent_leg_moves_to_next_agent() {
    let h = harness(RetryPolicy::default()).await;
    let lead = h.add_lead("+15551110007").await;
    let first_agent = h.add_agent("Carol", 1).await;
    let second_agent = h.add_agent("Dave", 1).await;

    h.launch_all().await;
    let call = h.call_for(&lead).await;
    h.answered_by(&call, AnsweredBy::Human).await;

    let offered = h.call_for(&lead).await.agent_id.unwrap();
    let other = if offered == first_agent.id {
        second_agent.id
    } else {
        first_agent.id
    };

    // Whisper timed out, agent hung up without pressing a key
    h.agent_leg(call.id, offered, CallStatus::Completed).await;

    let rerouted = h.call_for(&lead).await;
    assert_eq!(rerouted.agent_id, Some(other));
    assert_eq!(rerouted.tried_agents, vec![offered, other]);
    assert_eq!(rerouted.status, CallStatus::Answered);
    assert_eq!(h.store.agent(offered).await.unwrap().current_calls, 0);
    assert_eq!(h.store.agent(other).await.unwrap().current_calls, 1);

    // Second agent declines too: nobody left, voicemail
    h.agent_leg(call.id, other, CallStatus::NoAnswer).await;
    let fallback = h.call_for(&lead).await;
    assert_eq!(fallback.phase, CallPhase::Voicemail);
    assert_eq!(fallback.disposition, Some(Disposition::Voicemail));
    assert_eq!(h.store.agent(other).await.unwrap().current_calls, 0);
    assert!(h.store.queue_entries().await.is_empty());

    h.status(&call, CallStatus::Completed).await;
    assert_eq!(h.store.queue_entries().await.len(), 1);
}

#[tokio::test]
async fn test_lead_hangup_during_transfer_ends_agent_leg() {
    let h = harness(RetryPolicy::default()).await;
    let lead = h.add_lead("+15551110008").await;
    let agent = h.add_agent("Erin", 1).await;

    h.launch_all().await;
    let call = h.call_for(&lead).await;
    h.answered_by(&call, AnsweredBy::Human).await;
    let agent_leg = h.agent_leg_call_id(agent.id);

    h.status(&call, CallStatus::Completed).await;
    assert!(h.provider.ended().contains(&agent_leg));
    // Still reserved until the agent leg reports its end
    assert_eq!(h.store.agent(agent.id).await.unwrap().current_calls, 1);

    h.agent_leg(call.id, agent.id, CallStatus::Completed).await;
    assert_eq!(h.store.agent(agent.id).await.unwrap().current_calls, 0);

    // A late accept after the lead left is turned away
    let late = h.engine.agent_accepted(call.id, agent.id).await.unwrap();
    assert_eq!(late, vec![CallInstruction::Hangup]);
}

#[tokio::test]
async fn test_events_for_unknown_calls_are_dropped() {
    let h = harness(RetryPolicy::default()).await;

    let result = h
        .engine
        .handle_status(StatusEvent {
            call_id: None,
            provider_call_id: ProviderCallId::new("CA_UNKNOWN"),
            status: CallStatus::Completed,
            duration_seconds: Some(10),
        })
        .await;
    assert_ok!(result);

    let whisper = h
        .engine
        .agent_answered(CallId::new(), AgentId::new())
        .await
        .unwrap();
    assert_eq!(whisper, vec![CallInstruction::Hangup]);
    assert!(h.store.calls().await.is_empty());
}

#[tokio::test]
async fn test_paused_campaign_is_not_dispatched() {
    let h = harness(RetryPolicy::default()).await;
    h.add_lead("+15551110009").await;
    h.engine.start_campaign(h.campaign.id).await.unwrap();
    h.engine.pause_campaign(h.campaign.id).await.unwrap();

    let report = h.dispatcher.tick(Utc::now()).await.unwrap();
    assert_eq!(report.launched, 0);
    assert_eq!(h.store.queue_entries().await.len(), 1);

    let stats = h.engine.stats(Some(h.campaign.id)).await.unwrap();
    assert_eq!(stats.queue_depth, 1);
    assert_eq!(stats.calls.total_calls, 0);
}
