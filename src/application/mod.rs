//! Application layer - the call-lifecycle orchestration engine
//!
//! This layer coordinates the domain objects:
//! - Call queue and dispatch
//! - Call launching
//! - Provider event handling (call state machine)
//! - Agent matching and warm transfer
//! - Retry scheduling

pub mod agent_matcher;
pub mod call_queue;
pub mod call_updates;
pub mod campaign_service;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod launcher;
pub mod retry;
pub mod settings;
pub mod state_machine;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use engine::{DialerEngine, DialerStats, Repositories};
pub use error::{DialerError, DialerResult, LaunchError};
pub use events::{DialerEvent, EventBus};
pub use launcher::CallHandle;
pub use retry::RetryDecision;
pub use settings::DialerSettings;
