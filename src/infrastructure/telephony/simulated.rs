//! In-process telephony provider
//!
//! Records every request instead of dialling. Used when no provider account
//! is configured and as the test double for engine scenarios.

use crate::domain::shared::{AgentId, DomainError, ProviderCallId, Result};
use crate::domain::telephony::{
    CallInstruction, CallLeg, PlaceCallRequest, RenderedInstructions, TelephonyProvider,
};
use crate::infrastructure::telephony::twiml::TwimlRenderer;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// One request the engine made of the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderAction {
    Placed {
        request: PlaceCallRequest,
        provider_call_id: ProviderCallId,
    },
    Updated {
        provider_call_id: ProviderCallId,
        instructions: Vec<CallInstruction>,
    },
    Ended {
        provider_call_id: ProviderCallId,
    },
}

pub struct SimulatedProvider {
    renderer: TwimlRenderer,
    next_sid: AtomicU64,
    reject_calls: AtomicBool,
    unreachable_agents: Mutex<HashSet<AgentId>>,
    actions: Mutex<Vec<ProviderAction>>,
}

impl SimulatedProvider {
    pub fn new(webhook_base_url: impl Into<String>) -> Self {
        Self {
            renderer: TwimlRenderer::new(webhook_base_url),
            next_sid: AtomicU64::new(1),
            reject_calls: AtomicBool::new(false),
            unreachable_agents: Mutex::new(HashSet::new()),
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent `place_call` fail
    pub fn reject_calls(&self, reject: bool) {
        self.reject_calls.store(reject, Ordering::SeqCst);
    }

    /// Make dialling this agent's leg fail
    pub fn make_unreachable(&self, agent_id: AgentId) {
        if let Ok(mut agents) = self.unreachable_agents.lock() {
            agents.insert(agent_id);
        }
    }

    pub fn actions(&self) -> Vec<ProviderAction> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }

    pub fn placed(&self) -> Vec<PlaceCallRequest> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                ProviderAction::Placed { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Instructions most recently pushed into `provider_call_id`
    pub fn last_update(&self, provider_call_id: &ProviderCallId) -> Option<Vec<CallInstruction>> {
        self.actions()
            .into_iter()
            .rev()
            .find_map(|action| match action {
                ProviderAction::Updated {
                    provider_call_id: pid,
                    instructions,
                } if &pid == provider_call_id => Some(instructions),
                _ => None,
            })
    }

    pub fn ended(&self) -> Vec<ProviderCallId> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                ProviderAction::Ended { provider_call_id } => Some(provider_call_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: ProviderAction) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }
}

#[async_trait]
impl TelephonyProvider for SimulatedProvider {
    async fn place_call(&self, request: &PlaceCallRequest) -> Result<ProviderCallId> {
        if self.reject_calls.load(Ordering::SeqCst) {
            return Err(DomainError::Provider("simulated rejection".to_string()));
        }
        if let CallLeg::Agent { agent_id } = &request.leg {
            let unreachable = self
                .unreachable_agents
                .lock()
                .map(|agents| agents.contains(agent_id))
                .unwrap_or(false);
            if unreachable {
                return Err(DomainError::Provider(format!(
                    "agent {} unreachable",
                    agent_id
                )));
            }
        }

        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst);
        let provider_call_id = ProviderCallId::new(format!("SIM{:06}", sid));
        info!(
            "Simulated call {} to {} for {}",
            provider_call_id, request.to, request.call_id
        );
        self.record(ProviderAction::Placed {
            request: request.clone(),
            provider_call_id: provider_call_id.clone(),
        });
        Ok(provider_call_id)
    }

    async fn update_call(
        &self,
        provider_call_id: &ProviderCallId,
        instructions: &[CallInstruction],
    ) -> Result<()> {
        self.record(ProviderAction::Updated {
            provider_call_id: provider_call_id.clone(),
            instructions: instructions.to_vec(),
        });
        Ok(())
    }

    async fn end_call(&self, provider_call_id: &ProviderCallId) -> Result<()> {
        self.record(ProviderAction::Ended {
            provider_call_id: provider_call_id.clone(),
        });
        Ok(())
    }

    fn validate_inbound_event<'a>(
        &self,
        _url: &str,
        _params: &[(String, String)],
        _signature: Option<&'a str>,
    ) -> bool {
        true
    }

    fn render(&self, instructions: &[CallInstruction]) -> RenderedInstructions {
        RenderedInstructions {
            content_type: "application/xml",
            body: self.renderer.render(instructions),
        }
    }
}
