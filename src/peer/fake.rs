//! Scripted controller used by the session tests.
//!
//! Descriptions are plain text listing the owner's tracks, so applying a
//! remote description can announce those tracks as remote tracks. Every
//! call is journaled for ordering assertions.

use crate::error::PeerError;
use crate::media::{LocalStream, TrackKind};
use crate::peer::connection::{PeerConnector, PeerController, PeerEvents};
use crate::peer::types::{
    IceCandidate, PeerEvent, PeerState, RemoteTrack, SdpType, SessionDescription,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOp {
    Attach(usize),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    RejectedCandidate(String),
    Close,
}

#[derive(Debug, Clone)]
struct TrackInfo {
    kind: TrackKind,
    id: String,
    stream_id: String,
}

pub fn fake_sdp(owner: &str, tracks: &[(TrackKind, &str, &str)]) -> String {
    let mut sdp = format!("fake-sdp owner={owner}\n");
    for (kind, id, stream_id) in tracks {
        sdp.push_str(&format!("track={} {} {}\n", kind.as_str(), id, stream_id));
    }
    sdp
}

fn parse_tracks(sdp: &str) -> Vec<TrackInfo> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix("track="))
        .filter_map(|rest| {
            let mut parts = rest.split_whitespace();
            let kind = match parts.next()? {
                "audio" => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            Some(TrackInfo {
                kind,
                id: parts.next()?.to_string(),
                stream_id: parts.next()?.to_string(),
            })
        })
        .collect()
}

pub fn fake_candidate(owner: &str, peer: usize, n: usize) -> String {
    format!("candidate:{owner}{peer}-{n} 1 udp 2130706431 192.0.2.{n} 5000{n} typ host")
}

struct PeerSlot {
    journal: Arc<Mutex<Vec<FakeOp>>>,
    events: PeerEvents,
}

#[derive(Clone)]
pub struct FakeConnector {
    name: String,
    candidates: usize,
    peers: Arc<Mutex<Vec<PeerSlot>>>,
}

impl FakeConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            candidates: 2,
            peers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn journal(&self, index: usize) -> Vec<FakeOp> {
        self.peers.lock().unwrap()[index].journal.lock().unwrap().clone()
    }

    pub fn last_journal(&self) -> Vec<FakeOp> {
        let count = self.peer_count();
        self.journal(count - 1)
    }

    /// Injects an event as if the latest connection had produced it
    pub fn emit(&self, event: PeerEvent) {
        let peers = self.peers.lock().unwrap();
        let _ = peers.last().unwrap().events.send(event);
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, events: PeerEvents) -> Result<Arc<dyn PeerController>, PeerError> {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let index = {
            let mut peers = self.peers.lock().unwrap();
            peers.push(PeerSlot {
                journal: journal.clone(),
                events: events.clone(),
            });
            peers.len() - 1
        };
        Ok(Arc::new(FakePeer {
            name: self.name.clone(),
            index,
            candidates: self.candidates,
            journal,
            events,
            tracks: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakePeer {
    name: String,
    index: usize,
    candidates: usize,
    journal: Arc<Mutex<Vec<FakeOp>>>,
    events: PeerEvents,
    tracks: Mutex<Vec<TrackInfo>>,
    local: Mutex<Option<SdpType>>,
    remote: Mutex<Option<SdpType>>,
    closed: AtomicBool,
}

impl FakePeer {
    fn record(&self, op: FakeOp) {
        self.journal.lock().unwrap().push(op);
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }

    fn own_sdp(&self) -> String {
        let tracks = self.tracks.lock().unwrap();
        let list: Vec<_> = tracks
            .iter()
            .map(|t| (t.kind, t.id.as_str(), t.stream_id.as_str()))
            .collect();
        fake_sdp(&self.name, &list)
    }

    fn maybe_connected(&self) {
        let both = self.local.lock().unwrap().is_some() && self.remote.lock().unwrap().is_some();
        if both {
            let _ = self
                .events
                .send(PeerEvent::StateChanged(PeerState::Connected));
        }
    }
}

#[async_trait]
impl PeerController for FakePeer {
    async fn attach_local_stream(&self, stream: &LocalStream) -> Result<(), PeerError> {
        self.ensure_open()?;
        let mut tracks = self.tracks.lock().unwrap();
        for track in stream.tracks() {
            tracks.push(TrackInfo {
                kind: track.kind(),
                id: track.id().to_string(),
                stream_id: stream.id().to_string(),
            });
        }
        self.record(FakeOp::Attach(tracks.len()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.record(FakeOp::CreateOffer);
        Ok(SessionDescription::offer(self.own_sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        if *self.remote.lock().unwrap() != Some(SdpType::Offer) {
            return Err(PeerError::InvalidState("answer without a remote offer".into()));
        }
        self.record(FakeOp::CreateAnswer);
        Ok(SessionDescription::answer(self.own_sdp()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(FakeOp::SetLocal(desc.sdp_type));
        *self.local.lock().unwrap() = Some(desc.sdp_type);

        for n in 1..=self.candidates {
            let _ = self.events.send(PeerEvent::LocalCandidate(IceCandidate::new(
                fake_candidate(&self.name, self.index, n),
            )));
        }
        let _ = self.events.send(PeerEvent::GatheringComplete);
        self.maybe_connected();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        {
            let mut remote = self.remote.lock().unwrap();
            if remote.is_some() {
                return Err(PeerError::InvalidState("remote description already set".into()));
            }
            if desc.sdp_type == SdpType::Answer && *self.local.lock().unwrap() != Some(SdpType::Offer)
            {
                return Err(PeerError::InvalidState("answer without a local offer".into()));
            }
            *remote = Some(desc.sdp_type);
        }
        self.record(FakeOp::SetRemote(desc.sdp_type));

        for track in parse_tracks(&desc.sdp) {
            let _ = self.events.send(PeerEvent::RemoteTrack(RemoteTrack {
                id: track.id,
                stream_id: track.stream_id,
                kind: track.kind,
                source: None,
            }));
        }
        self.maybe_connected();
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        if self.remote.lock().unwrap().is_none() {
            self.record(FakeOp::RejectedCandidate(candidate.candidate));
            return Err(PeerError::InvalidState(
                "candidate before remote description".into(),
            ));
        }
        self.record(FakeOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record(FakeOp::Close);
        }
        Ok(())
    }
}
