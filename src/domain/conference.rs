//! Warm-transfer conference naming
//!
//! Conferences have no lifecycle of their own. The name is derived from the
//! call id and stored on the call record.

use crate::domain::shared::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConferenceName(String);

impl ConferenceName {
    pub fn for_call(call_id: CallId) -> Self {
        Self(format!("call_{}", call_id))
    }

    pub fn from_string(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConferenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conference lifecycle event kinds reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConferenceEventKind {
    Start,
    End,
    Join,
    Leave,
}

impl ConferenceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConferenceEventKind::Start => "start",
            ConferenceEventKind::End => "end",
            ConferenceEventKind::Join => "join",
            ConferenceEventKind::Leave => "leave",
        }
    }

    /// Accepts both short names and the provider's `conference-start` style
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix("conference-").unwrap_or(s);
        let s = s.strip_prefix("participant-").unwrap_or(s);
        match s {
            "start" => Some(ConferenceEventKind::Start),
            "end" => Some(ConferenceEventKind::End),
            "join" => Some(ConferenceEventKind::Join),
            "leave" => Some(ConferenceEventKind::Leave),
            _ => None,
        }
    }
}
