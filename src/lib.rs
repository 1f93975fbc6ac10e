//! Two-party audio/video calls bootstrapped through a shared document store.
//!
//! Each participant runs a [`CallHandle`]. The first to join publishes an
//! offer in the call record, the second answers it, and both trickle ICE
//! candidates through per-role logs until the direct connection is up.

pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::{ServerConfig, SessionConfig};
pub use error::{CallError, ConfigError, MediaError, PeerError, SignalingError};
pub use events::{CallEvent, EventEmitter};
pub use logger::init_logging;
pub use media::{CaptureDevice, LocalStream, LocalTrack, MediaSource, TrackKind, VirtualDevice};
pub use peer::{PeerConnector, PeerController, RemoteStream, RemoteTrack, WebRtcConnector};
pub use session::{CallHandle, CallState, CallStatus};
pub use signaling::{CallRecord, MemoryStore, RecordChange, Role, SignalingStore};
