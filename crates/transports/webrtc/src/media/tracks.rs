//! Outbound media tracks
//!
//! A [`LocalTrack`] pairs one capture with one RTP track that is attached to
//! every peer connection of the call. Muting flips `enabled` and never
//! detaches the track, so remote sides keep a live (silent) stream.

use super::capture::CaptureStream;
use super::TrackKind;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus TOC-only frame that decodes to 20ms of silence
const OPUS_SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Outbound track backed by a local capture
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    rtp: Arc<TrackLocalStaticSample>,
    capture: Box<dyn CaptureStream>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl LocalTrack {
    /// Wrap `capture` in an Opus (audio) or VP8 (video) sample track
    pub fn new(kind: TrackKind, stream_id: &str, capture: Box<dyn CaptureStream>) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let rtp = Arc::new(TrackLocalStaticSample::new(
            codec_capability(kind),
            id.clone(),
            stream_id.to_string(),
        ));
        Self {
            id,
            kind,
            rtp,
            capture,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Release the capture device; idempotent
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enabled.store(false, Ordering::Release);
        self.capture.stop();
        debug!(track = %self.id, kind = %self.kind, "Local track stopped");
    }

    /// RTP track to hand to peer connections
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    pub fn audio_tap(&self) -> Option<Arc<dyn watchparty_core::AudioTap>> {
        self.capture.audio_tap()
    }

    /// Write one encoded frame to every attached connection
    ///
    /// A disabled audio track sends Opus silence in place of the frame; a
    /// disabled video track drops it.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::MediaTrackError(format!("track {} is stopped", self.id)));
        }

        let data = match (self.is_enabled(), self.kind) {
            (true, _) => data,
            (false, TrackKind::Audio) => Bytes::from_static(&OPUS_SILENCE_FRAME),
            (false, TrackKind::Video) => return Ok(()),
        };

        self.rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: "".to_owned(),
            rtcp_feedback: vec![],
        },
    }
}
