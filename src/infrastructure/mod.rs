//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Repository implementations (in-memory and PostgreSQL)
//! - Telephony provider adapters

pub mod persistence;
pub mod telephony;
