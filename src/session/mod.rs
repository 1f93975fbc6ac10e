//! One participant's side of a call.
//!
//! [`CallHandle::spawn`] starts a session actor; the handle sends it commands
//! and reads the state it publishes. Dropping every handle hangs up a joined
//! session; an unjoined one just ends.

mod actor;
pub mod state;

pub use state::{CallState, CallStatus};

use crate::config::SessionConfig;
use crate::error::{CallError, ConfigError};
use crate::events::{CallEvent, EventEmitter};
use crate::media::{CaptureDevice, LocalStream, MediaSource, TrackKind};
use crate::peer::connection::PeerConnector;
use crate::peer::types::RemoteStream;
use crate::signaling::{Role, SignalingStore};
use actor::{Command, Outputs, SessionActor};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, info_span, Instrument};

const COMMAND_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct CallHandle {
    call_id: String,
    commands: mpsc::Sender<Command>,
    cancel: Arc<watch::Sender<bool>>,
    state: watch::Receiver<CallState>,
    status: watch::Receiver<CallStatus>,
    local: watch::Receiver<Option<LocalStream>>,
    remote: watch::Receiver<RemoteStream>,
    emitter: EventEmitter,
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("call_id", &self.call_id)
            .field("state", &self.state())
            .finish()
    }
}

impl CallHandle {
    /// Validates `config` and starts the session actor on the current tokio
    /// runtime. The session stays `Idle` until [`join`](Self::join).
    pub fn spawn(
        config: SessionConfig,
        store: Arc<dyn SignalingStore>,
        connector: Arc<dyn PeerConnector>,
        device: Arc<dyn CaptureDevice>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (state_tx, state) = watch::channel(CallState::Idle);
        let (status_tx, status) = watch::channel(CallStatus::Idle);
        let (local_tx, local) = watch::channel(None);
        let (remote_tx, remote) = watch::channel(RemoteStream::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new();

        let span = info_span!(
            "call",
            call_id = %config.call_id,
            local = %config.local_id,
            remote = %config.remote_id
        );
        let call_id = config.call_id.clone();
        info!(%call_id, local = %config.local_id, remote = %config.remote_id, "call session created");

        let actor = SessionActor::new(
            config,
            store,
            connector,
            MediaSource::new(device),
            Outputs {
                state: state_tx,
                status: status_tx,
                local: local_tx,
                remote: remote_tx,
                emitter: emitter.clone(),
            },
            cancel_rx,
            inbox_tx,
        );
        tokio::spawn(actor.run(commands_rx, inbox_rx).instrument(span));

        Ok(Self {
            call_id,
            commands: commands_tx,
            cancel: Arc::new(cancel_tx),
            state,
            status,
            local,
            remote,
            emitter,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Resolves the role through the shared call record and negotiates the
    /// connection. Returns once the offer is published (caller) or the answer
    /// is published (callee).
    pub async fn join(&self) -> Result<Role, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Join(reply))
            .await
            .map_err(|_| CallError::SessionEnded)?;
        rx.await.map_err(|_| CallError::SessionEnded)?
    }

    /// Ends the call from any state, interrupting a join in progress.
    /// Calling it again is a no-op.
    pub async fn hang_up(&self) {
        self.cancel.send_replace(true);
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::HangUp(done)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn set_audio_enabled(&self, enabled: bool) {
        self.set_track_enabled(TrackKind::Audio, enabled).await;
    }

    pub async fn set_video_enabled(&self, enabled: bool) {
        self.set_track_enabled(TrackKind::Video, enabled).await;
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let (done, rx) = oneshot::channel();
        let command = Command::SetTrackEnabled {
            kind,
            enabled,
            done,
        };
        if self.commands.send(command).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    /// The acquired camera/microphone stream, until teardown
    pub fn local_stream(&self) -> Option<LocalStream> {
        self.local.borrow().clone()
    }

    pub fn remote_stream(&self) -> RemoteStream {
        self.remote.borrow().clone()
    }

    pub fn watch_remote_stream(&self) -> watch::Receiver<RemoteStream> {
        self.remote.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.emitter.subscribe()
    }
}
