pub mod connection;
#[cfg(test)]
pub(crate) mod fake;
pub mod ice;
pub mod types;

pub use connection::{PeerConnector, PeerController, PeerEvents, WebRtcConnector, WebRtcPeer};
pub use ice::{analyze_candidates, apply_pending_candidates, CandidateSummary, PendingCandidates};
pub use types::{
    IceCandidate, PeerEvent, PeerState, RemoteStream, RemoteTrack, SdpType, SessionDescription,
};
