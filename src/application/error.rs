//! Engine error taxonomy

use crate::domain::shared::{CallId, DomainError, LeadId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialerError {
    /// Lead was already claimed by another dispatch
    #[error("Lead {0} is already being dialled")]
    DispatchConflict(LeadId),

    /// Provider refused to create the call
    #[error("Provider rejected the call: {0}")]
    ProviderRejected(String),

    #[error("No agent available for call {0}")]
    NoAgentAvailable(CallId),

    #[error("Invalid event signature")]
    InvalidEventSignature,

    /// Event refers to a call or agent we cannot resolve
    #[error("Unknown correlation id: {0}")]
    UnknownCorrelationId(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Errors returned by the call launcher
pub type LaunchError = DialerError;

pub type DialerResult<T> = std::result::Result<T, DialerError>;

impl DialerError {
    /// Metrics label for events that are logged and dropped
    pub fn drop_reason(&self) -> Option<&'static str> {
        match self {
            DialerError::UnknownCorrelationId(_) => Some("unknown_correlation_id"),
            DialerError::InvalidEventSignature => Some("invalid_signature"),
            _ => None,
        }
    }
}
