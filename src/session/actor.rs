//! The session actor: the only place that mutates call state.
//!
//! Commands from [`CallHandle`](super::CallHandle), peer events, record
//! changes, remote candidates and timers all arrive as messages and are
//! handled one at a time. Events that arrive while a command is running wait
//! in the inbox, so local candidates found before the role's record write
//! has landed are published afterwards, in discovery order.

use crate::config::SessionConfig;
use crate::error::{CallError, SignalingError};
use crate::events::EventEmitter;
use crate::logger::dump_candidate;
use crate::media::{LocalStream, MediaSource, TrackKind};
use crate::peer::connection::{PeerConnector, PeerController};
use crate::peer::ice::{analyze_candidates, apply_pending_candidates, PendingCandidates};
use crate::peer::types::{IceCandidate, PeerEvent, PeerState, RemoteStream, SessionDescription};
use crate::session::state::{CallState, CallStatus};
use crate::signaling::{
    CallRecord, CallRecordUpdate, CandidateEntry, RecordChange, Role, SignalingStore, Subscription,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub(crate) enum Command {
    Join(oneshot::Sender<Result<Role, CallError>>),
    HangUp(oneshot::Sender<()>),
    SetTrackEnabled {
        kind: TrackKind,
        enabled: bool,
        done: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// `generation` identifies the controller that produced the event
    Peer { generation: u64, event: PeerEvent },
    Record(RecordChange),
    RemoteCandidate(CandidateEntry),
    AnswerTimeout,
    GraceExpired(u64),
}

/// Resolves to `true` once a hang-up was requested, `false` if every handle is gone
async fn hung_up(mut cancel: watch::Receiver<bool>) -> bool {
    cancel.wait_for(|hung_up| *hung_up).await.is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    LocalHangUp,
    /// Every handle dropped before the session joined; nothing shared is touched
    Abandoned,
    RemoteHangUp,
    Failure,
}

/// Channels the actor publishes its observable state on
pub(crate) struct Outputs {
    pub state: watch::Sender<CallState>,
    pub status: watch::Sender<CallStatus>,
    pub local: watch::Sender<Option<LocalStream>>,
    pub remote: watch::Sender<RemoteStream>,
    pub emitter: EventEmitter,
}

pub(crate) struct SessionActor {
    config: SessionConfig,
    store: Arc<dyn SignalingStore>,
    connector: Arc<dyn PeerConnector>,
    media: MediaSource,
    out: Outputs,
    cancel: watch::Receiver<bool>,
    inbox: mpsc::UnboundedSender<SessionEvent>,

    role: Option<Role>,
    peer: Option<Arc<dyn PeerController>>,
    generation: u64,
    peer_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    remote_description_set: bool,
    pending: PendingCandidates,
    last_remote_seq: u64,
    local_candidates: Vec<IceCandidate>,
    grace: Option<JoinHandle<()>>,
    grace_token: u64,
    last_error: Option<CallError>,
}

impl SessionActor {
    pub(crate) fn new(
        config: SessionConfig,
        store: Arc<dyn SignalingStore>,
        connector: Arc<dyn PeerConnector>,
        media: MediaSource,
        out: Outputs,
        cancel: watch::Receiver<bool>,
        inbox: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            store,
            connector,
            media,
            out,
            cancel,
            inbox,
            role: None,
            peer: None,
            generation: 0,
            peer_task: None,
            tasks: Vec::new(),
            remote_description_set: false,
            pending: PendingCandidates::default(),
            last_remote_seq: 0,
            local_candidates: Vec::new(),
            grace: None,
            grace_token: 0,
            last_error: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("all call handles dropped");
                        let cause = if self.state() == CallState::Idle {
                            Teardown::Abandoned
                        } else {
                            Teardown::LocalHangUp
                        };
                        self.teardown(cause).await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
    }

    fn state(&self) -> CallState {
        *self.out.state.borrow()
    }

    fn transition(&mut self, next: CallState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        info!(from = previous.as_str(), to = next.as_str(), "call state changed");
        self.out.state.send_replace(next);
        self.out.emitter.emit_state(next);

        let status = CallStatus::derive(next, self.last_error.as_ref());
        if *self.out.status.borrow() != status {
            self.out.status.send_replace(status.clone());
            self.out.emitter.emit_status(status);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join(reply) => {
                let result = self.join().await;
                let _ = reply.send(result);
            }
            Command::HangUp(done) => {
                self.teardown(Teardown::LocalHangUp).await;
                let _ = done.send(());
            }
            Command::SetTrackEnabled {
                kind,
                enabled,
                done,
            } => {
                match kind {
                    TrackKind::Audio => self.media.set_audio_enabled(enabled),
                    TrackKind::Video => self.media.set_video_enabled(enabled),
                }
                let _ = done.send(());
            }
        }
    }

    // ---------------------------------------------------------------- join

    async fn join(&mut self) -> Result<Role, CallError> {
        match self.state() {
            CallState::Idle => {}
            CallState::Ended => return Err(CallError::SessionEnded),
            _ => return Err(CallError::AlreadyJoined),
        }
        self.transition(CallState::Joining);

        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            true = hung_up(cancel) => None,
            outcome = self.resolve_role() => Some(outcome),
        };

        match outcome {
            None => {
                info!("join interrupted by hang-up");
                Err(CallError::SessionEnded)
            }
            Some(Ok(role)) => Ok(role),
            Some(Err(err)) => {
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn resolve_role(&mut self) -> Result<Role, CallError> {
        let stream = self.acquire_media().await?;
        let call_id = self.config.call_id.clone();

        let existing = match self.store.read_call_record(&call_id).await? {
            Some(record) if record.initiator_id == self.config.local_id => {
                warn!(%call_id, "found a call record left by an earlier session, resetting it");
                self.delete_shared_state().await;
                None
            }
            other => other,
        };

        let Some(record) = existing else {
            return match self.start_as_caller(&stream).await {
                Err(err) if err.is_recoverable() => {
                    info!(%call_id, "other participant created the call first, answering instead");
                    self.discard_peer().await;
                    match self.store.read_call_record(&call_id).await? {
                        Some(record) => self.start_as_callee(&stream, record).await,
                        None => Err(CallError::NegotiationFailure(
                            "call record vanished after a lost create".into(),
                        )),
                    }
                }
                other => other,
            };
        };
        self.start_as_callee(&stream, record).await
    }

    async fn acquire_media(&mut self) -> Result<LocalStream, CallError> {
        match self.media.acquire().await {
            Ok(stream) => {
                self.out.emitter.emit_permission(true);
                self.out.local.send_replace(Some(stream.clone()));
                Ok(stream)
            }
            Err(err) => {
                self.out.emitter.emit_permission(false);
                Err(err.into())
            }
        }
    }

    async fn start_as_caller(&mut self, stream: &LocalStream) -> Result<Role, CallError> {
        let peer = self.open_peer(stream).await?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;

        // Subscribed before the create so a deletion right after it is not missed.
        // A lost race drops the subscription with the error.
        let changes = self.subscribe_record().await?;
        let record = CallRecord::ringing(&self.config.local_id, &self.config.remote_id, offer);
        self.store
            .create_call_record(&self.config.call_id, &record)
            .await?;
        self.role = Some(Role::Initiator);
        self.transition(CallState::Offering);
        info!(call_id = %self.config.call_id, "offer published, waiting for an answer");

        // The record is ours now: entries left in the logs by an earlier call
        // on this id must not reach the new connection.
        self.store.delete_all_candidates(&self.config.call_id).await?;

        self.forward_record(changes);
        self.watch_remote_candidates(Role::Initiator).await?;
        self.arm_answer_timer();
        Ok(Role::Initiator)
    }

    async fn start_as_callee(
        &mut self,
        stream: &LocalStream,
        record: CallRecord,
    ) -> Result<Role, CallError> {
        if !record.offered_by(&self.config.remote_id, &self.config.local_id) {
            return Err(CallError::NegotiationFailure(format!(
                "call {} is between {} and {}",
                self.config.call_id, record.initiator_id, record.recipient_id
            )));
        }
        let offer = record
            .offer
            .ok_or_else(|| CallError::NegotiationFailure("call record carries no offer".into()))?;
        self.transition(CallState::Answering);

        let peer = self.open_peer(stream).await?;
        let changes = self.subscribe_record().await?;
        self.forward_record(changes);
        self.watch_remote_candidates(Role::Recipient).await?;
        self.apply_remote_description(&peer, offer).await?;

        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        match self
            .store
            .update_call_record(&self.config.call_id, &CallRecordUpdate::answered(answer))
            .await
        {
            Ok(()) => {}
            Err(SignalingError::NotFound(_)) => {
                return Err(CallError::NegotiationFailure(
                    "call was withdrawn before it was answered".into(),
                ))
            }
            Err(err) => return Err(err.into()),
        }
        self.role = Some(Role::Recipient);
        info!(call_id = %self.config.call_id, "answer published");
        self.transition(CallState::Connected);
        Ok(Role::Recipient)
    }

    /// New controller with the local tracks attached. Events from it are
    /// tagged with a fresh generation so a discarded controller goes quiet.
    async fn open_peer(&mut self, stream: &LocalStream) -> Result<Arc<dyn PeerController>, CallError> {
        self.generation += 1;
        let generation = self.generation;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = self.connector.connect(tx).await?;

        let inbox = self.inbox.clone();
        self.peer_task = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if inbox.send(SessionEvent::Peer { generation, event }).is_err() {
                    break;
                }
            }
        }));
        self.peer = Some(Arc::clone(&peer));
        self.remote_description_set = false;
        self.local_candidates.clear();

        peer.attach_local_stream(stream).await?;
        debug!(generation, tracks = stream.tracks().len(), "controller ready");
        Ok(peer)
    }

    /// Closes the half-built controller of a lost race; nothing it
    /// gathered is ever published.
    async fn discard_peer(&mut self) {
        if let Some(task) = self.peer_task.take() {
            task.abort();
        }
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!(error = %e, "failed to close discarded controller");
            }
        }
        self.local_candidates.clear();
        self.remote_description_set = false;
    }

    async fn subscribe_record(&self) -> Result<Subscription<RecordChange>, CallError> {
        Ok(self.store.watch_call_record(&self.config.call_id).await?)
    }

    fn forward_record(&mut self, mut changes: Subscription<RecordChange>) {
        let inbox = self.inbox.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                if inbox.send(SessionEvent::Record(change)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Follows the log written by the other side of `own`
    async fn watch_remote_candidates(&mut self, own: Role) -> Result<(), CallError> {
        let role = own.other();
        let mut entries = self
            .store
            .watch_candidates(&self.config.call_id, role)
            .await?;
        debug!(log = role.log_name(), "watching remote candidates");
        let inbox = self.inbox.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(entry) = entries.next().await {
                if inbox.send(SessionEvent::RemoteCandidate(entry)).is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn arm_answer_timer(&mut self) {
        let Some(timeout) = self.config.answer_timeout() else {
            return;
        };
        let inbox = self.inbox.clone();
        self.tasks.push(tokio::spawn(async move {
            sleep(timeout).await;
            let _ = inbox.send(SessionEvent::AnswerTimeout);
        }));
    }

    /// Sets the remote description once, then flushes candidates that
    /// arrived before it
    async fn apply_remote_description(
        &mut self,
        peer: &Arc<dyn PeerController>,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        if self.remote_description_set {
            debug!("remote description already applied, ignoring");
            return Ok(());
        }
        peer.set_remote_description(desc).await?;
        self.remote_description_set = true;

        if !self.pending.is_empty() {
            let queued = self.pending.len();
            let applied = apply_pending_candidates(peer.as_ref(), &mut self.pending).await;
            info!(queued, applied, "flushed early remote candidates");
        }
        Ok(())
    }

    // -------------------------------------------------------------- events

    async fn handle_event(&mut self, event: SessionEvent) {
        if self.state().is_ended() {
            debug!(?event, "session ended, event ignored");
            return;
        }
        match event {
            SessionEvent::Peer { generation, event } => {
                if generation != self.generation || self.peer.is_none() {
                    debug!(generation, "event from a discarded controller");
                    return;
                }
                self.on_peer_event(event).await;
            }
            SessionEvent::Record(change) => self.on_record_change(change).await,
            SessionEvent::RemoteCandidate(entry) => self.on_remote_candidate(entry).await,
            SessionEvent::AnswerTimeout => {
                if self.state() == CallState::Offering {
                    self.out.emitter.emit_not_answered();
                }
            }
            SessionEvent::GraceExpired(token) => {
                if token == self.grace_token && self.grace.take().is_some() {
                    let grace = self.config.disconnect_grace();
                    self.fail(CallError::PeerUnreachable(format!(
                        "disconnected for more than {}s",
                        grace.as_secs()
                    )))
                    .await;
                }
            }
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                dump_candidate("local", &candidate);
                self.local_candidates.push(candidate.clone());
                self.publish_candidate(candidate).await;
            }
            PeerEvent::GatheringComplete => {
                analyze_candidates(&self.local_candidates);
            }
            PeerEvent::RemoteTrack(track) => {
                let mut added = false;
                self.out
                    .remote
                    .send_modify(|stream| added = stream.add(track.clone()));
                if added {
                    info!(track_id = %track.id, kind = track.kind.as_str(), "remote track added");
                    self.out.emitter.emit_remote_track(track);
                }
            }
            PeerEvent::StateChanged(state) => self.on_peer_state(state).await,
        }
    }

    async fn publish_candidate(&mut self, candidate: IceCandidate) {
        let Some(role) = self.role else {
            debug!("no role yet, local candidate dropped");
            return;
        };
        match self
            .store
            .append_candidate(&self.config.call_id, role, &candidate)
            .await
        {
            Ok(entry) => debug!(log = role.log_name(), seq = entry.seq, "local candidate published"),
            Err(SignalingError::Unavailable(msg)) => {
                self.fail(CallError::SignalingUnavailable(msg)).await
            }
            Err(e) => warn!(error = %e, "failed to publish local candidate"),
        }
    }

    async fn on_peer_state(&mut self, state: PeerState) {
        match state {
            PeerState::Connected => {
                if let Some(task) = self.grace.take() {
                    task.abort();
                    self.out.emitter.emit_connection_recovered();
                } else {
                    info!("media path established");
                }
            }
            PeerState::Disconnected => {
                if self.grace.is_some() {
                    return;
                }
                self.out.emitter.emit_connection_problem();
                self.grace_token += 1;
                let token = self.grace_token;
                let grace = self.config.disconnect_grace();
                info!(grace_secs = grace.as_secs(), "grace period started");
                let inbox = self.inbox.clone();
                self.grace = Some(tokio::spawn(async move {
                    sleep(grace).await;
                    let _ = inbox.send(SessionEvent::GraceExpired(token));
                }));
            }
            PeerState::Failed => {
                self.fail(CallError::PeerUnreachable("connection failed".into()))
                    .await
            }
            other => debug!(state = ?other, "peer state"),
        }
    }

    async fn on_record_change(&mut self, change: RecordChange) {
        match change {
            RecordChange::Deleted => {
                info!(call_id = %self.config.call_id, "call record deleted by the other participant");
                self.teardown(Teardown::RemoteHangUp).await;
            }
            RecordChange::Present(record) => {
                if self.role != Some(Role::Initiator)
                    || self.state() != CallState::Offering
                    || self.remote_description_set
                {
                    return;
                }
                let (Some(answer), Some(peer)) = (record.answer, self.peer.clone()) else {
                    return;
                };
                info!("answer received");
                match self.apply_remote_description(&peer, answer).await {
                    Ok(()) => self.transition(CallState::Connected),
                    Err(err) => self.fail(err).await,
                }
            }
        }
    }

    async fn on_remote_candidate(&mut self, entry: CandidateEntry) {
        if entry.seq <= self.last_remote_seq {
            debug!(seq = entry.seq, "duplicate remote candidate ignored");
            return;
        }
        self.last_remote_seq = entry.seq;
        dump_candidate("remote", &entry.candidate);

        let Some(peer) = self.peer.clone() else {
            return;
        };
        if self.remote_description_set {
            if let Err(e) = peer.add_remote_ice_candidate(entry.candidate).await {
                warn!(error = %e, seq = entry.seq, "failed to add remote candidate");
            }
        } else {
            self.pending.push(entry.candidate);
        }
    }

    // ------------------------------------------------------------ teardown

    async fn fail(&mut self, err: CallError) {
        error!(error = %err, "call failed");
        self.last_error = Some(err.clone());
        self.out.emitter.emit_error(err);
        self.teardown(Teardown::Failure).await;
    }

    /// The single terminal cleanup every ending goes through
    async fn teardown(&mut self, cause: Teardown) {
        if self.state().is_ended() {
            return;
        }
        info!(?cause, state = self.state().as_str(), "tearing down call");

        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.grace.take() {
            task.abort();
        }
        if let Some(task) = self.peer_task.take() {
            task.abort();
        }
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!(error = %e, "failed to close peer connection");
            }
        }

        self.media.release().await;
        self.out.local.send_replace(None);
        self.out.remote.send_replace(RemoteStream::default());
        self.pending.clear();
        self.local_candidates.clear();

        let delete = match cause {
            Teardown::LocalHangUp => true,
            Teardown::Abandoned | Teardown::RemoteHangUp => false,
            Teardown::Failure => self.role.is_some(),
        };
        if delete {
            self.delete_shared_state().await;
        }
        self.transition(CallState::Ended);
    }

    /// Removes the record and both logs; each delete is attempted on its own
    async fn delete_shared_state(&self) {
        let call_id = &self.config.call_id;
        for role in [Role::Initiator, Role::Recipient] {
            if let Err(e) = self.store.delete_candidates(call_id, role).await {
                warn!(%call_id, log = role.log_name(), error = %e, "failed to delete candidates");
            }
        }
        if let Err(e) = self.store.delete_call_record(call_id).await {
            warn!(%call_id, error = %e, "failed to delete call record");
        }
    }
}
