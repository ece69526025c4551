//! Peer manager for the call mesh
//!
//! Each remote participant gets a worker task that owns its
//! [`PeerSession`]; commands reach it over a queue, so a slow negotiation
//! with one peer never holds up another. Outbound signaling produced by the
//! workers is collected on a single channel for the caller to broadcast.

use super::negotiation::{NegotiationRole, PeerSession};
use super::{ConnectionState, PeerEvent, PeerFactory, PeerState};
use crate::config::CallConfig;
use crate::media::{LocalTrack, MediaSinkRegistry};
use crate::signaling::{SignalEnvelope, SignalKind};
use crate::{Error, Result};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum PeerCommand {
    Signal(SignalKind),
    AttachTrack(Arc<LocalTrack>),
    Close(oneshot::Sender<bool>),
}

struct PeerHandle {
    commands: mpsc::UnboundedSender<PeerCommand>,
    state: watch::Receiver<PeerState>,
    task: JoinHandle<()>,
}

/// Everything a worker needs besides its own queue
#[derive(Clone)]
struct WorkerContext {
    local_id: String,
    factory: Arc<dyn PeerFactory>,
    local_tracks: Arc<RwLock<Vec<Arc<LocalTrack>>>>,
    outbound: mpsc::UnboundedSender<SignalEnvelope>,
    sinks: MediaSinkRegistry,
    negotiation_timeout: Duration,
}

/// Mesh of peer connections for the local participant
///
/// Manages at most `max_peers` simultaneous connections (1..=10).
pub struct PeerManager {
    max_peers: usize,
    peers: RwLock<HashMap<String, PeerHandle>>,
    context: WorkerContext,
}

impl PeerManager {
    /// Create a manager; the receiver yields signaling to deliver
    pub fn new(
        local_id: impl Into<String>,
        factory: Arc<dyn PeerFactory>,
        config: &CallConfig,
        sinks: MediaSinkRegistry,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalEnvelope>)> {
        if config.max_peers == 0 || config.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                config.max_peers
            )));
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let manager = Self {
            max_peers: config.max_peers as usize,
            peers: RwLock::new(HashMap::new()),
            context: WorkerContext {
                local_id: local_id.into(),
                factory,
                local_tracks: Arc::new(RwLock::new(Vec::new())),
                outbound,
                sinks,
                negotiation_timeout: config.negotiation_timeout(),
            },
        };
        Ok((manager, outbound_rx))
    }

    pub fn local_id(&self) -> &str {
        &self.context.local_id
    }

    /// Start a connection toward a participant that just joined
    ///
    /// This side initiates: it sends the first offer.
    pub async fn connect(&self, remote_id: &str) -> Result<()> {
        self.spawn_peer(remote_id, NegotiationRole::Initiator)?;
        info!("Connecting to peer {} as initiator", remote_id);
        Ok(())
    }

    /// Route one inbound signaling message
    ///
    /// An offer from an unknown participant creates its connection as the
    /// responder. Anything else for an unknown participant is dropped.
    pub async fn handle_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        if envelope.target_id != self.context.local_id {
            debug!(target = %envelope.target_id, "Signal for another participant ignored");
            return Ok(());
        }
        let remote_id = envelope.sender_id;

        if !self.peers.read().contains_key(&remote_id) {
            if !matches!(envelope.kind, SignalKind::Offer { .. }) {
                debug!(
                    remote_id = %remote_id,
                    signal = envelope.kind.name(),
                    "Signal for unknown peer dropped"
                );
                return Ok(());
            }
            self.spawn_peer(&remote_id, NegotiationRole::Responder)?;
            info!("Accepting connection from peer {} as responder", remote_id);
        }

        self.send(&remote_id, PeerCommand::Signal(envelope.kind))
    }

    /// Attach a new local track to every current and future connection
    pub async fn attach_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.context.local_tracks.write().push(Arc::clone(&track));
        let peers = self.peers.read();
        for (remote_id, handle) in peers.iter() {
            if handle
                .commands
                .send(PeerCommand::AttachTrack(Arc::clone(&track)))
                .is_err()
            {
                debug!(remote_id = %remote_id, "Peer worker gone, track not attached");
            }
        }
        info!(track = %track.id(), kind = %track.kind(), peers = peers.len(), "Local track attached to mesh");
        Ok(())
    }

    /// Close and forget one connection
    ///
    /// Returns `false` if there was no connection to close.
    pub async fn disconnect(&self, remote_id: &str) -> bool {
        let Some(handle) = self.peers.write().remove(remote_id) else {
            return false;
        };
        self.context.sinks.remove(remote_id);
        let closed = close_handle(remote_id, handle).await;
        info!("Peer {} removed", remote_id);
        closed
    }

    /// Close every connection concurrently
    pub async fn close_all(&self) {
        let handles: Vec<_> = self.peers.write().drain().collect();
        if handles.is_empty() {
            return;
        }
        info!("Closing {} peer connections", handles.len());
        join_all(handles.into_iter().map(|(remote_id, handle)| {
            self.context.sinks.remove(&remote_id);
            async move { close_handle(&remote_id, handle).await }
        }))
        .await;
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn has_peer(&self, remote_id: &str) -> bool {
        self.peers.read().contains_key(remote_id)
    }

    pub fn peer_state(&self, remote_id: &str) -> Option<PeerState> {
        self.peers.read().get(remote_id).map(|h| *h.state.borrow())
    }

    /// Remote participant ids, ordered
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.peers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn spawn_peer(&self, remote_id: &str, role: NegotiationRole) -> Result<()> {
        if remote_id == self.context.local_id {
            return Err(Error::PeerConnectionError(
                "Refusing to connect to self".to_string(),
            ));
        }

        let mut peers = self.peers.write();
        if peers.contains_key(remote_id) {
            warn!("Peer {} already connected", remote_id);
            return Err(Error::PeerConnectionError(format!(
                "Peer {} already connected",
                remote_id
            )));
        }
        if peers.len() >= self.max_peers {
            warn!(
                "Maximum peer limit reached ({}/{})",
                peers.len(),
                self.max_peers
            );
            return Err(Error::PeerConnectionError(format!(
                "Maximum peer limit reached: {}",
                self.max_peers
            )));
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PeerState::Idle);
        let task = tokio::spawn(run_peer(
            self.context.clone(),
            remote_id.to_string(),
            role,
            commands_rx,
            state_tx,
        ));
        peers.insert(
            remote_id.to_string(),
            PeerHandle {
                commands,
                state,
                task,
            },
        );
        Ok(())
    }

    fn send(&self, remote_id: &str, command: PeerCommand) -> Result<()> {
        let peers = self.peers.read();
        let handle = peers
            .get(remote_id)
            .ok_or_else(|| Error::PeerNotFound(remote_id.to_string()))?;
        handle
            .commands
            .send(command)
            .map_err(|_| Error::PeerConnectionError(format!("Peer {} worker stopped", remote_id)))
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        for (_, handle) in self.peers.get_mut().drain() {
            handle.task.abort();
        }
    }
}

async fn close_handle(remote_id: &str, handle: PeerHandle) -> bool {
    let (reply, closed) = oneshot::channel();
    if handle.commands.send(PeerCommand::Close(reply)).is_err() {
        debug!(remote_id = %remote_id, "Peer worker already stopped");
        return false;
    }
    let closed = closed.await.unwrap_or(false);
    if let Err(e) = handle.task.await {
        warn!(remote_id = %remote_id, "Peer worker ended abnormally: {}", e);
    }
    closed
}

async fn run_peer(
    ctx: WorkerContext,
    remote_id: String,
    role: NegotiationRole,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    state_tx: watch::Sender<PeerState>,
) {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let peer = match ctx.factory.create_peer(&remote_id, events_tx).await {
        Ok(peer) => peer,
        Err(e) => {
            // Silent failure: this participant just never gets a stream
            warn!(remote_id = %remote_id, "Failed to create peer connection: {}", e);
            state_tx.send_replace(PeerState::Closed);
            reply_to_close(&mut commands).await;
            return;
        }
    };
    let mut session = PeerSession::new(remote_id.clone(), role, peer);
    let mut attached = HashSet::new();

    let initial: Vec<_> = ctx.local_tracks.read().clone();
    for track in initial {
        attach(&session, &mut attached, &track).await;
    }

    match session.start().await {
        Ok(Some(offer)) => emit(&ctx, &remote_id, offer),
        Ok(None) => {}
        Err(e) => warn!(remote_id = %remote_id, "Initial offer failed: {}", e),
    }
    state_tx.send_replace(session.state());

    let watchdog = tokio::time::sleep(ctx.negotiation_timeout);
    tokio::pin!(watchdog);
    let mut watchdog_fired = false;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PeerCommand::Signal(kind)) => match session.on_signal(kind).await {
                    Ok(Some(reply)) => emit(&ctx, &remote_id, reply),
                    Ok(None) => {}
                    Err(e) => warn!(remote_id = %remote_id, "Signal handling failed: {}", e),
                },
                Some(PeerCommand::AttachTrack(track)) => {
                    attach(&session, &mut attached, &track).await;
                }
                Some(PeerCommand::Close(reply)) => {
                    let _ = reply.send(close_session(&mut session).await);
                    break;
                }
                None => {
                    close_session(&mut session).await;
                    break;
                }
            },
            Some(event) = events.recv() => match event {
                PeerEvent::LocalCandidate(candidate) => {
                    emit(&ctx, &remote_id, SignalKind::IceCandidate(candidate));
                }
                PeerEvent::RemoteTrack(track) => ctx.sinks.attach(&remote_id, track),
                PeerEvent::NegotiationNeeded => match session.on_negotiation_needed().await {
                    Ok(Some(offer)) => emit(&ctx, &remote_id, offer),
                    Ok(None) => {}
                    Err(e) => warn!(remote_id = %remote_id, "Renegotiation failed: {}", e),
                },
                PeerEvent::Transport(state) => {
                    session.on_transport_state(state);
                    if state == ConnectionState::Connected {
                        info!("Peer {} connected", remote_id);
                    }
                }
            },
            _ = &mut watchdog, if !watchdog_fired => {
                watchdog_fired = true;
                if session.state() != PeerState::Connected {
                    warn!(
                        remote_id = %remote_id,
                        state = ?session.state(),
                        timeout_secs = ctx.negotiation_timeout.as_secs(),
                        "Peer not connected within negotiation timeout"
                    );
                }
            }
        }
        state_tx.send_replace(session.state());
    }

    state_tx.send_replace(PeerState::Closed);
    debug!(remote_id = %remote_id, "Peer worker finished");
}

async fn attach(session: &PeerSession, attached: &mut HashSet<String>, track: &LocalTrack) {
    if !attached.insert(track.id().to_string()) {
        return;
    }
    if let Err(e) = session.peer().attach_track(track).await {
        warn!(remote_id = %session.remote_id(), "Track attach failed: {}", e);
    }
}

async fn close_session(session: &mut PeerSession) -> bool {
    match session.close().await {
        Ok(closed) => closed,
        Err(e) => {
            warn!(remote_id = %session.remote_id(), "Error while closing peer: {}", e);
            true
        }
    }
}

/// Answer pending close requests for a worker that never got a connection
async fn reply_to_close(commands: &mut mpsc::UnboundedReceiver<PeerCommand>) {
    while let Some(command) = commands.recv().await {
        if let PeerCommand::Close(reply) = command {
            let _ = reply.send(false);
            return;
        }
    }
}

fn emit(ctx: &WorkerContext, remote_id: &str, kind: SignalKind) {
    debug!(remote_id = %remote_id, signal = kind.name(), "Outbound signal");
    let envelope = SignalEnvelope {
        sender_id: ctx.local_id.clone(),
        target_id: remote_id.to_string(),
        kind,
    };
    if ctx.outbound.send(envelope).is_err() {
        debug!(remote_id = %remote_id, "Signal dropped, call is closing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::MediaPeer;
    use crate::signaling::IceCandidate;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        created: Mutex<Vec<String>>,
        closes: Arc<AtomicUsize>,
    }

    struct QuietPeer {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaPeer for QuietPeer {
        async fn attach_track(&self, _track: &LocalTrack) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<String> {
            Ok("offer".to_string())
        }
        async fn apply_offer(&self, _sdp: String) -> Result<String> {
            Ok("answer".to_string())
        }
        async fn apply_answer(&self, _sdp: String) -> Result<()> {
            Ok(())
        }
        async fn rollback(&self) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl PeerFactory for CountingFactory {
        async fn create_peer(
            &self,
            remote_id: &str,
            _events: mpsc::UnboundedSender<PeerEvent>,
        ) -> Result<Arc<dyn MediaPeer>> {
            self.created.lock().push(remote_id.to_string());
            Ok(Arc::new(QuietPeer {
                closes: self.closes.clone(),
            }))
        }
    }

    fn manager(max_peers: u32) -> (PeerManager, mpsc::UnboundedReceiver<SignalEnvelope>, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        let config = CallConfig {
            max_peers,
            ..Default::default()
        };
        let (manager, rx) =
            PeerManager::new("alice", factory.clone(), &config, MediaSinkRegistry::new()).unwrap();
        (manager, rx, factory)
    }

    #[test]
    fn test_max_peers_validated() {
        let config = CallConfig {
            max_peers: 11,
            ..Default::default()
        };
        let result = PeerManager::new(
            "alice",
            Arc::new(CountingFactory::default()),
            &config,
            MediaSinkRegistry::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_sends_offer() {
        let (manager, mut rx, _) = manager(10);
        manager.connect("bob").await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.sender_id, "alice");
        assert_eq!(envelope.target_id, "bob");
        assert_eq!(envelope.kind.name(), "offer");
        assert_eq!(manager.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_overflow_rejected() {
        let (manager, _rx, _) = manager(1);
        manager.connect("bob").await.unwrap();
        assert!(manager.connect("bob").await.is_err());
        assert!(manager.connect("carol").await.is_err());
        assert!(manager.connect("alice").await.is_err());
        assert_eq!(manager.peer_ids(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_offer_from_unknown_creates_responder() {
        let (manager, mut rx, factory) = manager(10);
        manager
            .handle_signal(SignalEnvelope {
                sender_id: "bob".to_string(),
                target_id: "alice".to_string(),
                kind: SignalKind::Offer {
                    sdp: "o".to_string(),
                },
            })
            .await
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.target_id, "bob");
        assert_eq!(
            reply.kind,
            SignalKind::Answer {
                sdp: "answer".to_string()
            }
        );
        assert_eq!(*factory.created.lock(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_stray_signals_create_nothing() {
        let (manager, _rx, factory) = manager(10);
        manager
            .handle_signal(SignalEnvelope {
                sender_id: "bob".to_string(),
                target_id: "alice".to_string(),
                kind: SignalKind::Answer {
                    sdp: "a".to_string(),
                },
            })
            .await
            .unwrap();
        manager
            .handle_signal(SignalEnvelope {
                sender_id: "bob".to_string(),
                target_id: "carol".to_string(),
                kind: SignalKind::Offer {
                    sdp: "o".to_string(),
                },
            })
            .await
            .unwrap();
        assert_eq!(manager.peer_count(), 0);
        assert!(factory.created.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_closes_exactly_once() {
        let (manager, _rx, factory) = manager(10);
        manager.connect("bob").await.unwrap();
        manager.connect("carol").await.unwrap();

        assert!(manager.disconnect("bob").await);
        assert!(!manager.disconnect("bob").await);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert!(!manager.has_peer("bob"));

        manager.close_all().await;
        assert_eq!(factory.closes.load(Ordering::SeqCst), 2);
        assert_eq!(manager.peer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_does_not_tear_down() {
        let (manager, _rx, _) = manager(10);
        manager.connect("bob").await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(manager.peer_state("bob"), Some(PeerState::Negotiating));
        assert!(manager.disconnect("bob").await);
    }
}
