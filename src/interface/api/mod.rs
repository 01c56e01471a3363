//! API interface implementations

pub mod agents_handler;
pub mod calls_handler;
pub mod campaigns_handler;
pub mod dto;
pub mod metrics_handler;
pub mod router;
pub mod state;
pub mod webhooks;
pub mod websocket;

pub use dto::{ApiError, ApiResponse};
pub use metrics_handler::init_metrics;
pub use router::build_router;
pub use state::AppState;
