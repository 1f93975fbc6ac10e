//! Local camera and microphone.
//!
//! A [`MediaSource`] asks its [`CaptureDevice`] for access once, then hands out
//! a [`LocalStream`] whose tracks are webrtc-rs sample tracks. Muting flips a
//! per-track flag; samples written to a muted or stopped track are dropped.

use crate::error::MediaError;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Stopped,
}

/// One captured track
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtp: Arc<TrackLocalStaticSample>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

impl LocalTrack {
    fn new(kind: TrackKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind.as_str(), random_id());
        let rtp = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.to_string(),
        ));
        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn state(&self) -> TrackState {
        if self.stopped.load(Ordering::SeqCst) {
            TrackState::Stopped
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// The track handed to the peer connection
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    /// Pushes one encoded frame. Returns `false` when the sample was dropped
    /// because the track is muted or stopped.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool, MediaError> {
        if self.state() == TrackState::Stopped || !self.is_enabled() {
            return Ok(false);
        }
        self.rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }
}

/// Tracks produced by one successful acquisition
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn audio_track(&self) -> Option<&Arc<LocalTrack>> {
        self.track(TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&Arc<LocalTrack>> {
        self.track(TrackKind::Video)
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.state() == TrackState::Stopped)
    }
}

/// Platform capture boundary. `open` is where the permission prompt happens.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, kinds: &[TrackKind]) -> Result<(), MediaError>;

    /// Frees the device; must not fail.
    async fn close(&self);
}

#[derive(Debug)]
enum Acquisition {
    NotRequested,
    Granted(LocalStream),
    Denied(String),
    Released,
}

/// Owns the local stream for one session
pub struct MediaSource {
    device: Arc<dyn CaptureDevice>,
    kinds: Vec<TrackKind>,
    acquisition: Acquisition,
}

impl MediaSource {
    /// Camera and microphone
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self::with_kinds(device, vec![TrackKind::Audio, TrackKind::Video])
    }

    pub fn with_kinds(device: Arc<dyn CaptureDevice>, kinds: Vec<TrackKind>) -> Self {
        Self {
            device,
            kinds,
            acquisition: Acquisition::NotRequested,
        }
    }

    /// Requests device access the first time; later calls return the same
    /// stream, or the same refusal, without prompting again.
    pub async fn acquire(&mut self) -> Result<LocalStream, MediaError> {
        match &self.acquisition {
            Acquisition::Granted(stream) => return Ok(stream.clone()),
            Acquisition::Denied(reason) => return Err(MediaError::PermissionDenied(reason.clone())),
            Acquisition::Released => return Err(MediaError::Released),
            Acquisition::NotRequested => {}
        }

        match self.device.open(&self.kinds).await {
            Ok(()) => {
                let id = format!("stream-{}", random_id());
                let tracks = self
                    .kinds
                    .iter()
                    .map(|kind| Arc::new(LocalTrack::new(*kind, &id)))
                    .collect::<Vec<_>>();
                info!(stream_id = %id, tracks = tracks.len(), "local media acquired");
                let stream = LocalStream { id, tracks };
                self.acquisition = Acquisition::Granted(stream.clone());
                Ok(stream)
            }
            Err(MediaError::PermissionDenied(reason)) => {
                warn!(%reason, "camera/microphone permission denied");
                self.acquisition = Acquisition::Denied(reason.clone());
                Err(MediaError::PermissionDenied(reason))
            }
            // Not a refusal, so a later attempt may prompt again
            Err(err) => {
                warn!(error = %err, "capture device could not be opened");
                Err(err)
            }
        }
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        match &self.acquisition {
            Acquisition::Granted(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.set_enabled(TrackKind::Video, enabled);
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.set_enabled(TrackKind::Audio, enabled);
    }

    fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        match self.stream().and_then(|s| s.track(kind)) {
            Some(track) => {
                debug!(kind = kind.as_str(), enabled, "toggle track");
                track.set_enabled(enabled);
            }
            None => debug!(kind = kind.as_str(), "no such track, toggle ignored"),
        }
    }

    /// Stops every track and frees the device. Safe to call repeatedly.
    pub async fn release(&mut self) {
        let previous = std::mem::replace(&mut self.acquisition, Acquisition::Released);
        if let Acquisition::Granted(stream) = previous {
            for track in stream.tracks() {
                track.stop();
            }
            self.device.close().await;
            info!(stream_id = %stream.id(), "local media released");
        }
    }
}

/// A capture device without hardware behind it: grants or refuses access
/// and counts how often it was opened. Frames are pushed by the caller
/// through [`LocalTrack::write_sample`].
#[derive(Debug)]
pub struct VirtualDevice {
    grant: bool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl VirtualDevice {
    pub fn granting() -> Self {
        Self {
            grant: true,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn denying() -> Self {
        Self {
            grant: false,
            ..Self::granting()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for VirtualDevice {
    async fn open(&self, _kinds: &[TrackKind]) -> Result<(), MediaError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.grant {
            Ok(())
        } else {
            Err(MediaError::PermissionDenied("access refused by user".into()))
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
