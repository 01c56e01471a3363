//! Autodialer - outbound campaign dialer engine
//!
//! Takes leads from campaign queues, places calls through a telephony
//! provider, tracks each call through provider callbacks, warm-transfers
//! answered humans to agents over a conference, drops voicemail on
//! machines and reschedules unsuccessful leads.
//!
//! Layered the usual way: `domain` holds the model and ports,
//! `application` the engine, `infrastructure` the stores and provider
//! adapters, `interface` the HTTP surface.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
