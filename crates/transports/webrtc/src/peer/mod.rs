//! Peer connections of the call mesh
//!
//! [`MediaPeer`] is the negotiated-connection primitive, implemented on the
//! `webrtc` crate by [`WebRtcPeer`]. [`PeerSession`] layers the per-pair
//! negotiation rules on top and [`PeerManager`] runs one session per remote
//! participant on its own task.

pub mod connection;
pub mod manager;
pub mod negotiation;

use crate::media::{LocalTrack, RemoteTrack};
use crate::signaling::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use connection::{WebRtcPeer, WebRtcPeerFactory};
pub use manager::PeerManager;
pub use negotiation::{NegotiationRole, PeerSession};

/// Lifecycle of one remote participant's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

/// Transport-level connection state reported by the primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callback-side events of a [`MediaPeer`]
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Locally gathered candidate to relay to the remote side
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    /// Local tracks changed after the connection was negotiated
    NegotiationNeeded,
    Transport(ConnectionState),
}

/// A negotiated media connection to one remote participant
#[async_trait]
pub trait MediaPeer: Send + Sync {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()>;

    /// Create and apply a local offer, returning its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer, then create and apply the answer, returning its SDP
    async fn apply_offer(&self, sdp: String) -> Result<String>;

    async fn apply_answer(&self, sdp: String) -> Result<()>;

    /// Discard our outstanding local offer, returning to a stable state
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates [`MediaPeer`]s wired to an event sink
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create_peer(
        &self,
        remote_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn MediaPeer>>;
}
