//! Shared handler state

use crate::application::DialerEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DialerEngine>,
    /// Public base URL the provider signs callbacks against
    pub webhook_base_url: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<DialerEngine>, webhook_base_url: &str) -> Self {
        Self {
            engine,
            webhook_base_url: Arc::from(webhook_base_url.trim_end_matches('/')),
        }
    }

    /// Reconstruct the URL the provider requested, as it signed it
    pub fn public_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.webhook_base_url, path_and_query)
    }
}
