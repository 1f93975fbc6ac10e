use crate::config::{rtc_config, ServerConfig};
use crate::error::PeerError;
use crate::media::LocalStream;
use crate::peer::types::{IceCandidate, PeerEvent, PeerState, RemoteTrack, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

/// Creates one controller per call attempt.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Local candidates, remote tracks and state changes of the new
    /// connection are sent on `events`.
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerController>, PeerError>;
}

/// One bidirectional media connection.
///
/// Ordering rules (offer before answer, candidates only after a remote
/// description, one remote description) are enforced by the session, not here.
#[async_trait]
pub trait PeerController: Send + Sync {
    async fn attach_local_stream(&self, stream: &LocalStream) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Idempotent
    async fn close(&self) -> Result<(), PeerError>;
}

/// Builds webrtc-rs peer connections against the configured ICE servers
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerController>, PeerError> {
        let peer = new_peer(&self.ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

/// Creates the connection and wires its callbacks into `events`
pub async fn new_peer(ice_servers: &[ServerConfig], events: PeerEvents) -> Result<WebRtcPeer, PeerError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
    info!(ice_servers = ice_servers.len(), "peer connection created");

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                },
                // None marks the end of gathering
                None => {
                    debug!("ICE candidate gathering completed");
                    let _ = tx.send(PeerEvent::GatheringComplete);
                }
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let tx = tx.clone();
            Box::pin(async move {
                let track = RemoteTrack::from_webrtc(track);
                info!(track_id = %track.id, kind = track.kind.as_str(), "remote track arrived");
                let _ = tx.send(PeerEvent::RemoteTrack(track));
            })
        },
    ));

    let tx = events;
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "peer connection state changed");
        let _ = tx.send(PeerEvent::StateChanged(PeerState::from(st)));
        Box::pin(async {})
    }));

    Ok(WebRtcPeer {
        pc,
        closed: AtomicBool::new(false),
    })
}

impl WebRtcPeer {
    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerController for WebRtcPeer {
    async fn attach_local_stream(&self, stream: &LocalStream) -> Result<(), PeerError> {
        self.ensure_open()?;
        for track in stream.tracks() {
            let sender = self
                .pc
                .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            debug!(track_id = %track.id(), "local track attached");

            // Drain RTCP so the interceptors keep running
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
            });
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        let offer = self.pc.create_offer(None).await?;
        SessionDescription::try_from(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        let answer = self.pc.create_answer(None).await?;
        SessionDescription::try_from(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing peer connection");
        self.pc.close().await?;
        Ok(())
    }
}
