//! Shared kernel - identifiers and error types used by every part of the dialer

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::DomainError;
pub use result::Result;
pub use value_objects::*;
