//! Realtime coordination core for watch parties
//!
//! This crate keeps many independently running video players converging on
//! one host-authored play position, and provides the presence and voice
//! activity building blocks the call layer (`watchparty-webrtc`) composes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  PartyBackend (persisted party rows, change notifications)│
//! │      ▲ host writes                  │ row changes         │
//! │      │                              ▼                     │
//! │  PlaybackCoordinator (host)   PlaybackCoordinator (follower)
//! │   ├─ HeartbeatThrottle         ├─ DriftReconciler         │
//! │   └─ AutoAdvanceCountdown      └─ syncing indicator       │
//! │      ▲ player events               │ play/pause/seek      │
//! │  VideoPlayer                   VideoPlayer                │
//! │                                                           │
//! │  PresenceTransport ── PresenceChannel ── PresenceRoster   │
//! │  AudioTap ── VoiceActivityMonitor (FFT bin average > 30)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use watchparty_core::config::WatchPartyConfig;
//!
//! let config = WatchPartyConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.sync.heartbeat_interval_ms, 1000);
//! ```

#![warn(clippy::all)]

pub mod chat;
pub mod config;
pub mod error;
pub mod party;
pub mod playback;
pub mod presence;
pub mod vad;

pub use chat::ChatFeed;
pub use config::{SyncConfig, VadConfig, WatchPartyConfig};
pub use error::{Error, Result};
pub use party::{
    next_episode, ChatMessage, Episode, EpisodeId, InMemoryPartyBackend, Participant, Party,
    PartyBackend, PartyId, PlaybackUpdate, UserId,
};
pub use playback::{
    CountdownState, DriftReconciler, PlaybackCoordinator, PlayerCommand, PlayerEvent, Role,
    SimulatedPlayer, SyncPhase, VideoPlayer,
};
pub use presence::{
    ChannelEvent, InMemoryPresenceHub, PresenceChannel, PresenceEntry, PresenceEvent,
    PresenceEvents, PresenceRoster, PresenceSnapshot, PresenceTransport, RosterDiff,
};
pub use vad::{AudioTap, FrequencyAnalyser, SampleRing, VoiceActivityMonitor};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
