//! Configuration management
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file
//! (path from `AUTODIALER_CONFIG`, default `autodialer.toml`), then
//! environment variables prefixed `AUTODIALER__` with `__` between levels,
//! e.g. `AUTODIALER__PROVIDER__AUTH_TOKEN`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "AUTODIALER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "autodialer.toml";
const ENV_PREFIX: &str = "AUTODIALER";

pub const DEFAULT_VOICEMAIL_MESSAGE: &str = "Hello, this is an important message. Please call us back at your earliest convenience. Thank you.";
pub const DEFAULT_HOLD_MUSIC_URL: &str =
    "http://twimlets.com/holdmusic?Bucket=com.twilio.music.classical";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub dialer: DialerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty selects the in-memory store
    pub url: String,
    pub max_connections: u32,
}

/// Telephony provider account and callback settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    /// Public base URL the provider calls back on
    pub webhook_base_url: String,
    pub api_base_url: String,
    pub validate_signatures: bool,
}

/// Engine timing and audio settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub lead_ring_timeout_secs: u32,
    pub agent_ring_timeout_secs: u32,
    pub agent_accept_timeout_secs: u32,
    pub voicemail_max_length_secs: u32,
    pub default_voicemail_message: String,
    pub hold_music_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            provider: ProviderConfig::default(),
            dialer: DialerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            webhook_base_url: "http://localhost:8080".to_string(),
            api_base_url: "https://api.twilio.com".to_string(),
            validate_signatures: true,
        }
    }
}

// Keep the auth token out of logs
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"****")
            .field("from_number", &self.from_number)
            .field("webhook_base_url", &self.webhook_base_url)
            .field("api_base_url", &self.api_base_url)
            .field("validate_signatures", &self.validate_signatures)
            .finish()
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 10,
            lead_ring_timeout_secs: 30,
            agent_ring_timeout_secs: 20,
            agent_accept_timeout_secs: 10,
            voicemail_max_length_secs: 120,
            default_voicemail_message: DEFAULT_VOICEMAIL_MESSAGE.to_string(),
            hold_music_url: DEFAULT_HOLD_MUSIC_URL.to_string(),
        }
    }
}

impl DialerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    /// Load from the file named by `AUTODIALER_CONFIG` (if present) and the
    /// environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
