//! Call value objects

use serde::{Deserialize, Serialize};

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Dialled by the campaign engine
    Outbound,
    /// Received from outside
    Inbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Outbound => "outbound",
            CallDirection::Inbound => "inbound",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(CallDirection::Outbound),
            "inbound" => Some(CallDirection::Inbound),
            _ => None,
        }
    }
}

/// Provider-reported call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Failed
                | CallStatus::Canceled
        )
    }

    /// Position in the forward-only lifecycle. All terminal statuses share
    /// the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            CallStatus::Initiated => 0,
            CallStatus::Ringing => 1,
            CallStatus::Answered => 2,
            _ => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Failed => "failed",
            CallStatus::Canceled => "canceled",
        }
    }

    /// Parse a provider status string. `queued` and `in-progress` are the
    /// provider's names for initiated and answered.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" | "queued" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "answered" | "in-progress" => Some(CallStatus::Answered),
            "completed" => Some(CallStatus::Completed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" | "no_answer" => Some(CallStatus::NoAnswer),
            "failed" => Some(CallStatus::Failed),
            "canceled" | "cancelled" => Some(CallStatus::Canceled),
            _ => None,
        }
    }
}

/// Final outcome classification of a call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Answered,
    Voicemail,
    NoAnswer,
    Busy,
    Failed,
    Completed,
}

impl Disposition {
    /// Disposition implied by a terminal status, if the status alone decides it
    pub fn from_terminal_status(status: CallStatus) -> Option<Self> {
        match status {
            CallStatus::Busy => Some(Disposition::Busy),
            CallStatus::NoAnswer => Some(Disposition::NoAnswer),
            CallStatus::Failed | CallStatus::Canceled => Some(Disposition::Failed),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Disposition::Answered | Disposition::Completed)
    }

    pub fn needs_retry(&self) -> bool {
        !self.is_success()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Answered => "answered",
            Disposition::Voicemail => "voicemail",
            Disposition::NoAnswer => "no_answer",
            Disposition::Busy => "busy",
            Disposition::Failed => "failed",
            Disposition::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "answered" => Some(Disposition::Answered),
            "voicemail" => Some(Disposition::Voicemail),
            "no_answer" => Some(Disposition::NoAnswer),
            "busy" => Some(Disposition::Busy),
            "failed" => Some(Disposition::Failed),
            "completed" => Some(Disposition::Completed),
            _ => None,
        }
    }
}

/// Answering-machine detection result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnsweredBy {
    Human,
    MachineStart,
    MachineEndBeep,
    MachineEndSilence,
    MachineEndOther,
    Fax,
    Unknown,
}

impl AnsweredBy {
    pub fn is_human(&self) -> bool {
        matches!(self, AnsweredBy::Human)
    }

    pub fn is_machine(&self) -> bool {
        matches!(
            self,
            AnsweredBy::MachineStart
                | AnsweredBy::MachineEndBeep
                | AnsweredBy::MachineEndSilence
                | AnsweredBy::MachineEndOther
                | AnsweredBy::Fax
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnsweredBy::Human => "human",
            AnsweredBy::MachineStart => "machine_start",
            AnsweredBy::MachineEndBeep => "machine_end_beep",
            AnsweredBy::MachineEndSilence => "machine_end_silence",
            AnsweredBy::MachineEndOther => "machine_end_other",
            AnsweredBy::Fax => "fax",
            AnsweredBy::Unknown => "unknown",
        }
    }

    /// Unrecognised values map to `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "human" => AnsweredBy::Human,
            "machine_start" => AnsweredBy::MachineStart,
            "machine_end_beep" => AnsweredBy::MachineEndBeep,
            "machine_end_silence" => AnsweredBy::MachineEndSilence,
            "machine_end_other" => AnsweredBy::MachineEndOther,
            "fax" => AnsweredBy::Fax,
            _ => AnsweredBy::Unknown,
        }
    }
}

/// Where an answered call is in its post-answer handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Not yet classified by answer detection
    Dialing,
    /// Voicemail drop in progress
    Voicemail,
    /// Lead on hold, agent leg ringing
    Transferring,
    /// Agent accepted and joined the conference
    Connected,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Dialing => "dialing",
            CallPhase::Voicemail => "voicemail",
            CallPhase::Transferring => "transferring",
            CallPhase::Connected => "connected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dialing" => Some(CallPhase::Dialing),
            "voicemail" => Some(CallPhase::Voicemail),
            "transferring" => Some(CallPhase::Transferring),
            "connected" => Some(CallPhase::Connected),
            _ => None,
        }
    }
}
