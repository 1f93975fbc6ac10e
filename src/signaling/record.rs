use crate::peer::types::{IceCandidate, SessionDescription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the call a participant plays; also names the candidate log it writes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Caller, created the record and the offer
    Initiator,
    /// Callee, merged the answer
    Recipient,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Initiator => Role::Recipient,
            Role::Recipient => Role::Initiator,
        }
    }

    /// Name of the candidate log this role appends to
    pub fn log_name(self) -> &'static str {
        match self {
            Role::Initiator => "offerCandidates",
            Role::Recipient => "answerCandidates",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Role::Initiator => 0,
            Role::Recipient => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ringing,
    Connected,
}

/// The shared negotiation state of one call
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub initiator_id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// A fresh ringing record carrying the caller's offer
    pub fn ringing(initiator_id: &str, recipient_id: &str, offer: SessionDescription) -> Self {
        Self {
            initiator_id: initiator_id.to_string(),
            recipient_id: recipient_id.to_string(),
            offer: Some(offer),
            answer: None,
            status: RecordStatus::Ringing,
            created_at: Utc::now(),
        }
    }

    /// True if `initiator` offered this call to `recipient`
    pub fn offered_by(&self, initiator: &str, recipient: &str) -> bool {
        self.initiator_id == initiator && self.recipient_id == recipient
    }
}

/// Fields merged into an existing record; `None` leaves a field untouched
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
}

impl CallRecordUpdate {
    pub fn answered(answer: SessionDescription) -> Self {
        Self {
            answer: Some(answer),
            status: Some(RecordStatus::Connected),
        }
    }
}

/// One appended candidate
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntry {
    pub id: String,
    /// Position in its log, starting at 1
    pub seq: u64,
    pub role: Role,
    pub candidate: IceCandidate,
}
