//! Engine runtime settings

use crate::config::{Config, DEFAULT_HOLD_MUSIC_URL, DEFAULT_VOICEMAIL_MESSAGE};

#[derive(Debug, Clone)]
pub struct DialerSettings {
    /// Caller id used when a campaign has none
    pub default_caller_id: String,
    pub lead_ring_timeout_secs: u32,
    pub agent_ring_timeout_secs: u32,
    pub agent_accept_timeout_secs: u32,
    pub voicemail_max_length_secs: u32,
    pub default_voicemail_message: String,
    pub hold_music_url: String,
}

impl DialerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_caller_id: config.provider.from_number.clone(),
            lead_ring_timeout_secs: config.dialer.lead_ring_timeout_secs,
            agent_ring_timeout_secs: config.dialer.agent_ring_timeout_secs,
            agent_accept_timeout_secs: config.dialer.agent_accept_timeout_secs,
            voicemail_max_length_secs: config.dialer.voicemail_max_length_secs,
            default_voicemail_message: config.dialer.default_voicemail_message.clone(),
            hold_music_url: config.dialer.hold_music_url.clone(),
        }
    }
}

impl Default for DialerSettings {
    fn default() -> Self {
        Self {
            default_caller_id: String::new(),
            lead_ring_timeout_secs: 30,
            agent_ring_timeout_secs: 20,
            agent_accept_timeout_secs: 10,
            voicemail_max_length_secs: 120,
            default_voicemail_message: DEFAULT_VOICEMAIL_MESSAGE.to_string(),
            hold_music_url: DEFAULT_HOLD_MUSIC_URL.to_string(),
        }
    }
}
