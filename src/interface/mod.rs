//! Interface layer - External interfaces
//!
//! This layer handles:
//! - Provider webhooks
//! - REST API endpoints
//! - WebSocket event stream
//! - Request/response formatting

pub mod api;
