use crate::error::CallError;
use serde::Serialize;

/// Lifecycle of one call session. `Ended` is final.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Joining,
    /// Caller: offer published, waiting for the answer
    Offering,
    /// Callee: answering the published offer
    Answering,
    Connected,
    Ended,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Joining => "joining",
            CallState::Offering => "offering",
            CallState::Answering => "answering",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        }
    }

    pub fn is_ended(self) -> bool {
        self == CallState::Ended
    }
}

/// Coarse status shown to the user
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "status", content = "message")]
pub enum CallStatus {
    Idle,
    Joining,
    InCall,
    Error(String),
}

impl CallStatus {
    /// A session that ended because of an error reports that error; one that
    /// was hung up goes back to idle.
    pub fn derive(state: CallState, last_error: Option<&CallError>) -> Self {
        match state {
            CallState::Idle => CallStatus::Idle,
            CallState::Joining | CallState::Offering | CallState::Answering => CallStatus::Joining,
            CallState::Connected => CallStatus::InCall,
            CallState::Ended => match last_error {
                Some(err) => CallStatus::Error(err.to_string()),
                None => CallStatus::Idle,
            },
        }
    }
}
