//! Call bounded context - one outbound dial attempt and everything the
//! provider reports about it

pub mod aggregate;
pub mod event;
pub mod repository;
pub mod value_object;

pub use aggregate::{AgentLeg, AnswerTransition, Call, Recording, StatusTransition};
pub use event::{AgentLegEvent, AnswerDetectionEvent, ConferenceEvent, RecordingEvent, StatusEvent};
pub use repository::{CallRepository, CallStats};
pub use value_object::{AnsweredBy, CallDirection, CallPhase, CallStatus, Disposition};
