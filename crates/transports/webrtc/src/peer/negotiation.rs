//! Offer/answer rules for one pair of participants
//!
//! Exactly one side of a pair initiates: the participant that was already in
//! the call when the other joined. The newcomer only answers. Candidates that
//! arrive before a remote description are queued and applied once it lands.
//! After the first exchange either side may renegotiate on its own
//! negotiation-needed signal. When both renegotiate at once the initiator's
//! offer wins: the responder rolls its own offer back and answers, and the
//! connection raises negotiation-needed again once it is stable.

use super::{ConnectionState, MediaPeer, PeerState};
use crate::signaling::{IceCandidate, SignalKind};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which side of the pair sends the first offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

/// Negotiation state for one remote participant
pub struct PeerSession {
    remote_id: String,
    role: NegotiationRole,
    peer: Arc<dyn MediaPeer>,
    state: PeerState,
    pending_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
    exchanged: bool,
    making_offer: bool,
}

impl PeerSession {
    pub fn new(remote_id: impl Into<String>, role: NegotiationRole, peer: Arc<dyn MediaPeer>) -> Self {
        Self {
            remote_id: remote_id.into(),
            role,
            peer,
            state: PeerState::Idle,
            pending_candidates: Vec::new(),
            remote_description_set: false,
            exchanged: false,
            making_offer: false,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn peer(&self) -> &Arc<dyn MediaPeer> {
        &self.peer
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// First offer/answer exchange has completed
    pub fn has_exchanged(&self) -> bool {
        self.exchanged
    }

    /// An offer of ours is waiting for its answer
    pub fn has_outstanding_offer(&self) -> bool {
        self.making_offer
    }

    /// Send the first offer if this side initiates
    pub async fn start(&mut self) -> Result<Option<SignalKind>> {
        if self.role != NegotiationRole::Initiator || self.state != PeerState::Idle {
            return Ok(None);
        }
        self.offer().await.map(Some)
    }

    /// Apply an inbound signal, returning the reply to send (an answer)
    pub async fn on_signal(&mut self, kind: SignalKind) -> Result<Option<SignalKind>> {
        if self.state == PeerState::Closed {
            debug!(remote_id = %self.remote_id, signal = kind.name(), "Signal for closed peer ignored");
            return Ok(None);
        }

        match kind {
            SignalKind::Offer { sdp } => {
                if self.making_offer {
                    if self.role == NegotiationRole::Initiator {
                        debug!(remote_id = %self.remote_id, "Colliding offer ignored, ours stands");
                        return Ok(None);
                    }
                    debug!(remote_id = %self.remote_id, "Colliding offer, rolling ours back");
                    self.peer.rollback().await?;
                    self.making_offer = false;
                }
                self.advance(PeerState::Negotiating);
                let answer = self.peer.apply_offer(sdp).await?;
                self.making_offer = false;
                self.on_remote_description().await;
                Ok(Some(SignalKind::Answer { sdp: answer }))
            }
            SignalKind::Answer { sdp } => {
                if !self.making_offer {
                    warn!(remote_id = %self.remote_id, "Unexpected answer without an outstanding offer");
                    return Ok(None);
                }
                self.peer.apply_answer(sdp).await?;
                self.making_offer = false;
                self.on_remote_description().await;
                Ok(None)
            }
            SignalKind::IceCandidate(candidate) => {
                if self.remote_description_set {
                    self.apply_candidate(candidate).await;
                } else {
                    self.pending_candidates.push(candidate);
                }
                Ok(None)
            }
        }
    }

    /// React to the connection's negotiation-needed signal
    ///
    /// Ignored until the first exchange has completed (the initiator role
    /// drives that one) and while an offer is already outstanding.
    pub async fn on_negotiation_needed(&mut self) -> Result<Option<SignalKind>> {
        if !self.exchanged || self.making_offer || self.state == PeerState::Closed {
            debug!(
                remote_id = %self.remote_id,
                exchanged = self.exchanged,
                making_offer = self.making_offer,
                "Negotiation-needed deferred"
            );
            return Ok(None);
        }
        debug!(remote_id = %self.remote_id, "Renegotiating");
        self.offer().await.map(Some)
    }

    pub fn on_transport_state(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => self.advance(PeerState::Connected),
            ConnectionState::Failed | ConnectionState::Disconnected => {
                // No reconnect; the peer stays until the participant leaves
                warn!(remote_id = %self.remote_id, ?state, "Peer transport lost");
            }
            ConnectionState::Closed => self.advance(PeerState::Closed),
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    /// Close the connection; returns `false` if it was already closed
    pub async fn close(&mut self) -> Result<bool> {
        if self.state == PeerState::Closed {
            return Ok(false);
        }
        self.state = PeerState::Closed;
        self.pending_candidates.clear();
        self.peer.close().await?;
        Ok(true)
    }

    async fn offer(&mut self) -> Result<SignalKind> {
        self.advance(PeerState::Negotiating);
        self.making_offer = true;
        match self.peer.create_offer().await {
            Ok(sdp) => Ok(SignalKind::Offer { sdp }),
            Err(e) => {
                self.making_offer = false;
                Err(e)
            }
        }
    }

    async fn on_remote_description(&mut self) {
        self.remote_description_set = true;
        self.exchanged = true;
        let queued = std::mem::take(&mut self.pending_candidates);
        if !queued.is_empty() {
            debug!(remote_id = %self.remote_id, count = queued.len(), "Applying queued ICE candidates");
        }
        for candidate in queued {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            warn!(remote_id = %self.remote_id, "Dropping ICE candidate: {}", e);
        }
    }

    fn advance(&mut self, next: PeerState) {
        let allowed = matches!(
            (self.state, next),
            (PeerState::Idle, PeerState::Negotiating)
                | (PeerState::Idle, PeerState::Connected)
                | (PeerState::Negotiating, PeerState::Connected)
                | (_, PeerState::Closed)
        );
        if allowed {
            debug!(remote_id = %self.remote_id, from = ?self.state, to = ?next, "Peer state");
            self.state = next;
        }
    }
}
