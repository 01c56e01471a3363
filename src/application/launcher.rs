//! Call launcher
//!
//! Turns a claimed queue entry into a live provider call. The lead's
//! `pending|queued -> calling` transition is the guard against dialling the
//! same lead twice.

use crate::application::call_updates::{merge_call, Merge};
use crate::application::error::{DialerError, LaunchError};
use crate::application::events::{now_ts, DialerEvent, EventBus};
use crate::application::retry::RetryScheduler;
use crate::application::settings::DialerSettings;
use crate::domain::call::{Call, CallRepository, CallStatus};
use crate::domain::call_queue::QueueEntry;
use crate::domain::campaign::CampaignRepository;
use crate::domain::lead::{LeadRepository, LeadStatus};
use crate::domain::shared::{CallId, DomainError, LeadId, ProviderCallId};
use crate::domain::telephony::{AmdMode, CallLeg, PlaceCallRequest, TelephonyProvider};
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A call that was handed to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    pub call_id: CallId,
    pub lead_id: LeadId,
    pub provider_call_id: ProviderCallId,
}

pub struct CallLauncher {
    leads: Arc<dyn LeadRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    calls: Arc<dyn CallRepository>,
    provider: Arc<dyn TelephonyProvider>,
    retry: Arc<RetryScheduler>,
    events: Arc<EventBus>,
    settings: DialerSettings,
}

impl CallLauncher {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        calls: Arc<dyn CallRepository>,
        provider: Arc<dyn TelephonyProvider>,
        retry: Arc<RetryScheduler>,
        events: Arc<EventBus>,
        settings: DialerSettings,
    ) -> Self {
        Self {
            leads,
            campaigns,
            calls,
            provider,
            retry,
            events,
            settings,
        }
    }

    pub async fn launch(&self, entry: &QueueEntry) -> Result<CallHandle, LaunchError> {
        let campaign = self
            .campaigns
            .get(entry.campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", entry.campaign_id)))?;

        let now = Utc::now();
        let Some(lead) = self.leads.try_mark_calling(entry.lead_id, now).await? else {
            counter!("dialer_dispatch_conflicts_total").increment(1);
            info!("Lead {} already claimed, skipping dispatch", entry.lead_id);
            return Err(DialerError::DispatchConflict(entry.lead_id));
        };

        let call = Call::new(campaign.id, lead.id);
        if let Err(e) = self.record_attempt(&call).await {
            error!("Failed to record call {} for lead {}: {}", call.id, lead.id, e);
            self.release_lead(lead.id).await;
            return Err(e.into());
        }

        let from = if campaign.caller_id.is_empty() {
            self.settings.default_caller_id.clone()
        } else {
            campaign.caller_id.clone()
        };
        let request = PlaceCallRequest {
            call_id: call.id,
            to: lead.phone.clone(),
            from,
            leg: CallLeg::Lead {
                lead_id: lead.id,
                amd: AmdMode::for_campaign(campaign.amd_enabled),
            },
            ring_timeout_secs: self.settings.lead_ring_timeout_secs,
        };

        match self.provider.place_call(&request).await {
            Ok(provider_call_id) => {
                let attached = provider_call_id.clone();
                merge_call(self.calls.as_ref(), call.id, |c| {
                    c.attach_provider_call_id(attached.clone()).then_some(())
                })
                .await?;

                counter!("dialer_calls_launched_total").increment(1);
                info!(
                    "Launched call {} to lead {} (attempt {}, provider id {})",
                    call.id, lead.id, lead.call_attempts, provider_call_id
                );
                self.events.publish(DialerEvent::CallLaunched {
                    call_id: call.id,
                    lead_id: lead.id,
                    campaign_id: campaign.id,
                    timestamp: now_ts(),
                });

                Ok(CallHandle {
                    call_id: call.id,
                    lead_id: lead.id,
                    provider_call_id,
                })
            }
            Err(e) => {
                counter!("dialer_calls_rejected_total").increment(1);
                warn!("Provider rejected call {} to lead {}: {}", call.id, lead.id, e);

                let merged = merge_call(self.calls.as_ref(), call.id, |c| {
                    c.apply_status(CallStatus::Failed, Some(0), Utc::now());
                    c.claim_retry().then_some(())
                })
                .await?;
                self.leads.set_status(lead.id, LeadStatus::Failed).await?;

                if matches!(merged, Merge::Applied(..)) {
                    if let Err(retry_err) = self.retry.schedule_or_complete(lead.id).await {
                        error!("Failed to schedule retry for lead {}: {}", lead.id, retry_err);
                    }
                }

                Err(DialerError::ProviderRejected(e.to_string()))
            }
        }
    }

    async fn record_attempt(&self, call: &Call) -> crate::domain::shared::Result<()> {
        self.campaigns.increment_calls_made(call.campaign_id).await?;
        self.calls.insert(call).await
    }

    /// Give a claimed lead back when its call could not be set up. The claim
    /// already counted the attempt.
    async fn release_lead(&self, lead_id: LeadId) {
        if let Err(e) = self.leads.set_status(lead_id, LeadStatus::Failed).await {
            error!("Failed to mark lead {} failed: {}", lead_id, e);
        }
        if let Err(e) = self.retry.schedule_or_complete(lead_id).await {
            error!("Failed to schedule retry for lead {}: {}", lead_id, e);
        }
    }
}
