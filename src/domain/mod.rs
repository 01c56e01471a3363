//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Entities: campaigns, leads, agents, calls
//! - Value Objects: ids, statuses, dispositions, conference names
//! - Repository Interfaces: Ports for persistence
//! - The telephony provider port

pub mod agent;
pub mod call;
pub mod call_queue;
pub mod campaign;
pub mod conference;
pub mod lead;
pub mod shared;
pub mod telephony;

// Re-export commonly used types
pub use shared::{DomainError, Result};
