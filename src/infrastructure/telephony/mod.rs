//! Telephony provider adapters
//!
//! - `twilio`: REST client for placing and steering calls
//! - `twiml`: instruction rendering
//! - `callbacks`: inbound webhook forms to domain events
//! - `simulated`: in-process provider for local runs and tests

pub mod callbacks;
pub mod simulated;
pub mod twilio;
pub mod twiml;

use crate::config::ProviderConfig;
use crate::domain::shared::Result;
use crate::domain::telephony::TelephonyProvider;
use std::sync::Arc;
use tracing::{info, warn};

pub use simulated::{ProviderAction, SimulatedProvider};
pub use twilio::TwilioProvider;
pub use twiml::TwimlRenderer;

/// Webhook routes the provider is pointed at
pub mod webhook_paths {
    pub const STATUS: &str = "/webhooks/provider/status";
    pub const AMD: &str = "/webhooks/provider/amd";
    pub const RECORDING: &str = "/webhooks/provider/recording";
    pub const AGENT_ANSWER: &str = "/webhooks/provider/agent-answer";
    pub const AGENT_ACCEPT: &str = "/webhooks/provider/agent-accept";
    pub const AGENT_STATUS: &str = "/webhooks/provider/agent-status";
    pub const CONFERENCE_STATUS: &str = "/webhooks/provider/conference-status";
}

/// Whether inbound webhooks will be checked against the provider signature
pub fn webhooks_authenticated(config: &ProviderConfig) -> bool {
    !config.account_sid.is_empty() && config.validate_signatures
}

/// Twilio when an account is configured, the simulated provider otherwise
pub fn provider_from_config(config: &ProviderConfig) -> Result<Arc<dyn TelephonyProvider>> {
    let provider: Arc<dyn TelephonyProvider> = if config.account_sid.is_empty() {
        warn!("No provider account configured, using the simulated provider");
        Arc::new(SimulatedProvider::new(config.webhook_base_url.clone()))
    } else {
        info!("Using Twilio account {}", config.account_sid);
        Arc::new(TwilioProvider::from_config(config)?)
    };

    if !webhooks_authenticated(config) {
        warn!(
            "Webhook signature validation is DISABLED: {} accepts unauthenticated provider events",
            config.webhook_base_url
        );
    }
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twilio_config() -> ProviderConfig {
        ProviderConfig {
            account_sid: "AC00000000000000000000000000000000".to_string(),
            auth_token: "secret".to_string(),
            validate_signatures: true,
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_simulated_provider_is_unauthenticated() {
        let config = ProviderConfig::default();
        assert!(!webhooks_authenticated(&config));

        let provider = provider_from_config(&config).unwrap();
        assert!(provider.validate_inbound_event("https://x/webhooks", &[], None));
    }

    #[test]
    fn test_configured_account_requires_signatures() {
        let config = twilio_config();
        assert!(webhooks_authenticated(&config));

        let provider = provider_from_config(&config).unwrap();
        assert!(!provider.validate_inbound_event("https://x/webhooks", &[], None));

        let unchecked = ProviderConfig {
            validate_signatures: false,
            ..twilio_config()
        };
        assert!(!webhooks_authenticated(&unchecked));
    }
}
