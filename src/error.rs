//! Error types for every layer of the call stack.

use thiserror::Error;

/// Failures of the local capture device.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The user (or platform) refused camera/microphone access
    #[error("camera/microphone permission denied: {0}")]
    PermissionDenied(String),

    /// The device could not be opened for another reason
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `acquire` called after `release`
    #[error("media source already released")]
    Released,

    /// Writing a sample to the outgoing track failed
    #[error("failed to write sample: {0}")]
    Write(#[from] webrtc::Error),
}

/// Failures of the shared signaling store.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Conditional create found an existing record
    #[error("call record already exists for call {0}")]
    AlreadyExists(String),

    /// Merge into a record that does not exist
    #[error("no call record for call {0}")]
    NotFound(String),

    /// The store cannot be reached
    #[error("signaling store unavailable: {0}")]
    Unavailable(String),

    /// A stored document does not decode into the expected shape
    #[error("malformed signaling document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures of the peer connection controller.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// A negotiation step was issued out of order
    #[error("invalid negotiation step: {0}")]
    InvalidState(String),

    #[error("peer connection is closed")]
    Closed,
}

/// Invalid session or ICE server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("local and remote participant ids must differ (both are {0:?})")]
    SameParticipant(String),

    #[error("ICE server {0:?} has an empty url")]
    EmptyServerUrl(String),

    #[error("ICE server {0:?}: unknown type {1:?}, expected \"stun\" or \"turn\"")]
    UnknownServerType(String, String),

    #[error("TURN server {0:?} requires username and credential")]
    MissingTurnCredentials(String),

    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced by a call session.
///
/// Cloneable so it can travel on the event broadcast next to the status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("camera/microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Capture failed for a reason other than a refusal
    #[error("camera/microphone unavailable: {0}")]
    MediaUnavailable(String),

    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// The other participant created the call record first
    #[error("lost the race to create the call record")]
    RecordRaceLost,

    #[error("session already joined")]
    AlreadyJoined,

    #[error("session has ended")]
    SessionEnded,
}

impl CallError {
    /// Recovered inside the session instead of ending the attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CallError::RecordRaceLost)
    }
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied(reason) => CallError::PermissionDenied(reason),
            MediaError::DeviceUnavailable(reason) => CallError::MediaUnavailable(reason),
            other => CallError::MediaUnavailable(other.to_string()),
        }
    }
}

impl From<SignalingError> for CallError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::AlreadyExists(_) => CallError::RecordRaceLost,
            SignalingError::Unavailable(msg) => CallError::SignalingUnavailable(msg),
            other => CallError::NegotiationFailure(other.to_string()),
        }
    }
}

impl From<PeerError> for CallError {
    fn from(err: PeerError) -> Self {
        CallError::NegotiationFailure(err.to_string())
    }
}
