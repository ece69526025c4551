//! Full-mesh WebRTC calls for watch parties
//!
//! Every participant in a party's call holds one peer connection to every
//! other participant. Offers, answers and ICE candidates travel as
//! point-to-point broadcasts on the call's presence topic, and the same
//! topic carries each participant's mute, camera and speaking attributes.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  CallCoordinator                                       │
//! │  ├─ MediaCapture → LocalTrack (audio, optional video)  │
//! │  ├─ VoiceActivityMonitor → isSpeaking republish        │
//! │  ├─ PresenceChannel "call:{party_id}"                  │
//! │  │    join/leave → connect/disconnect                  │
//! │  │    "signal" broadcasts ↔ SignalEnvelope             │
//! │  └─ PeerManager (one worker task per remote)           │
//! │       └─ PeerSession → MediaPeer (WebRtcPeer)          │
//! │            on_track → MediaSinkRegistry                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use watchparty_webrtc::CallConfig;
//!
//! let config = CallConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.topic_for("party-1"), "call:party-1");
//! ```

#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;

pub use call::{CallCoordinator, CallParticipant};
pub use config::CallConfig;
pub use error::{Error, Result};
pub use media::{
    CaptureError, CaptureStream, LocalTrack, MediaCapture, MediaSinkRegistry, RemoteStream,
    RemoteTrack, TrackKind,
};
pub use peer::{
    ConnectionState, MediaPeer, NegotiationRole, PeerEvent, PeerFactory, PeerManager,
    PeerSession, PeerState, WebRtcPeer, WebRtcPeerFactory,
};
pub use signaling::{IceCandidate, SignalEnvelope, SignalKind};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
