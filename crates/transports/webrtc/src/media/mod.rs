//! Local capture, outbound tracks and the remote stream registry

pub mod capture;
pub mod sinks;
pub mod tracks;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureError, CaptureStream, MediaCapture};
pub use sinks::{MediaSinkRegistry, RemoteStream, RemoteTrack};
pub use tracks::LocalTrack;

/// Media kind of a track or capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}
