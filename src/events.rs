//! Notifications pushed up to the UI layer.

use crate::error::CallError;
use crate::peer::types::RemoteTrack;
use crate::session::state::{CallState, CallStatus};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    StatusChanged(CallStatus),
    /// Outcome of the camera/microphone request
    PermissionResult { granted: bool },
    RemoteTrackAdded(RemoteTrack),
    /// The caller has waited longer than the configured answer timeout
    NotAnswered,
    ConnectionProblem,
    ConnectionRecovered,
    Error(CallError),
}

/// Broadcasts call events; sending with nobody listening is fine.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<CallEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: CallEvent) {
        debug!(?event, "emit");
        let _ = self.tx.send(event);
    }

    pub fn emit_state(&self, state: CallState) {
        self.emit(CallEvent::StateChanged(state));
    }

    pub fn emit_status(&self, status: CallStatus) {
        self.emit(CallEvent::StatusChanged(status));
    }

    pub fn emit_permission(&self, granted: bool) {
        if !granted {
            warn!("camera/microphone permission refused");
        }
        self.emit(CallEvent::PermissionResult { granted });
    }

    pub fn emit_remote_track(&self, track: RemoteTrack) {
        self.emit(CallEvent::RemoteTrackAdded(track));
    }

    pub fn emit_not_answered(&self) {
        info!("call not answered yet");
        self.emit(CallEvent::NotAnswered);
    }

    pub fn emit_connection_problem(&self) {
        warn!("connection issues detected");
        self.emit(CallEvent::ConnectionProblem);
    }

    pub fn emit_connection_recovered(&self) {
        info!("connection recovered");
        self.emit(CallEvent::ConnectionRecovered);
    }

    pub fn emit_error(&self, err: CallError) {
        self.emit(CallEvent::Error(err));
    }
}
