//! In-process peer connections
//!
//! A fake SDP is just the comma-separated list of attached track kinds.
//! Applying a remote description announces the listed kinds as remote
//! tracks and reports the transport as connected, which is enough to drive
//! the mesh logic without sockets.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use watchparty_webrtc::{
    ConnectionState, IceCandidate, LocalTrack, MediaPeer, PeerEvent, PeerFactory, RemoteTrack,
    Result, TrackKind,
};

/// Records every connection it creates
pub struct FakePeerFactory {
    local_id: String,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn new(local_id: &str) -> Arc<Self> {
        Arc::new(Self {
            local_id: local_id.to_string(),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// How many connections were ever created toward `remote_id`
    pub fn created_for(&self, remote_id: &str) -> usize {
        self.peers
            .lock()
            .iter()
            .filter(|p| p.remote_id == remote_id)
            .count()
    }

    /// Most recent connection toward `remote_id`
    pub fn peer(&self, remote_id: &str) -> Arc<FakePeer> {
        self.peers
            .lock()
            .iter()
            .rev()
            .find(|p| p.remote_id == remote_id)
            .cloned()
            .unwrap_or_else(|| panic!("{} never connected to {}", self.local_id, remote_id))
    }

    pub fn all(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create_peer(
        &self,
        remote_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn MediaPeer>> {
        let peer = Arc::new(FakePeer {
            local_id: self.local_id.clone(),
            remote_id: remote_id.to_string(),
            events,
            tracks: Mutex::new(Vec::new()),
            announced: Mutex::new(HashSet::new()),
            candidates: Mutex::new(Vec::new()),
            exchanged: AtomicBool::new(false),
            offers: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakePeer {
    local_id: String,
    pub remote_id: String,
    events: mpsc::UnboundedSender<PeerEvent>,
    tracks: Mutex<Vec<TrackKind>>,
    announced: Mutex<HashSet<TrackKind>>,
    candidates: Mutex<Vec<IceCandidate>>,
    exchanged: AtomicBool,
    offers: AtomicUsize,
    closes: AtomicUsize,
}

impl FakePeer {
    /// Kinds attached as outbound tracks, in attach order
    pub fn tracks(&self) -> Vec<TrackKind> {
        self.tracks.lock().clone()
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Remote candidates applied so far
    pub fn candidates(&self) -> usize {
        self.candidates.lock().len()
    }

    fn local_sdp(&self) -> String {
        self.tracks
            .lock()
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn on_remote_sdp(&self, sdp: &str) {
        for kind in sdp.split(',') {
            let kind = match kind {
                "audio" => TrackKind::Audio,
                "video" => TrackKind::Video,
                _ => continue,
            };
            if self.announced.lock().insert(kind) {
                let _ = self.events.send(PeerEvent::RemoteTrack(RemoteTrack::new(
                    format!("{}-{}", self.remote_id, kind),
                    self.remote_id.clone(),
                    kind,
                )));
            }
        }
        self.exchanged.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(PeerEvent::Transport(ConnectionState::Connected));
    }
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        self.tracks.lock().push(track.kind());
        if self.exchanged.load(Ordering::SeqCst) {
            let _ = self.events.send(PeerEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(PeerEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:{}", self.local_id),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }));
        Ok(self.local_sdp())
    }

    async fn apply_offer(&self, sdp: String) -> Result<String> {
        self.on_remote_sdp(&sdp);
        Ok(self.local_sdp())
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        self.on_remote_sdp(&sdp);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
