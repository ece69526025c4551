//! Call coordinator
//!
//! One implementation for voice-only and voice+video calls; video is an
//! optional capability that can also be added mid-call.

use crate::config::CallConfig;
use crate::media::{LocalTrack, MediaCapture, MediaSinkRegistry, RemoteStream, TrackKind};
use crate::peer::{PeerFactory, PeerManager};
use crate::signaling::{SignalEnvelope, SIGNAL_EVENT};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use watchparty_core::{
    ChannelEvent, PartyId, PresenceChannel, PresenceEntry, PresenceEvents, PresenceRoster,
    PresenceTransport, UserId, VoiceActivityMonitor,
};

/// A remote call participant as seen through presence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParticipant {
    pub id: String,
    pub entry: PresenceEntry,
}

/// Resources held while in a call
struct ActiveCall {
    /// Distinguishes this call from a later one after leave and rejoin
    id: u64,
    channel: Arc<PresenceChannel>,
    peers: Arc<PeerManager>,
    audio: Arc<LocalTrack>,
    video: Option<Arc<LocalTrack>>,
    vad: Option<VoiceActivityMonitor>,
    /// Published attributes; locked across `track` so publishes never reorder
    entry: Arc<Mutex<PresenceEntry>>,
    task: JoinHandle<()>,
}

impl ActiveCall {
    fn stop_media(&self) {
        stop_tracks(&self.audio, self.video.as_ref());
        if let Some(vad) = &self.vad {
            vad.stop();
        }
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.task.abort();
        self.stop_media();
    }
}

fn stop_tracks(audio: &LocalTrack, video: Option<&Arc<LocalTrack>>) {
    audio.stop();
    if let Some(video) = video {
        video.stop();
    }
}

/// A join that is still acquiring capture devices
///
/// `leave_call` cancels it by clearing the slot; dropping it clears the slot
/// too, so an abandoned join never blocks the next one.
struct PendingJoin<'a> {
    slot: &'a parking_lot::Mutex<Option<u64>>,
    ticket: u64,
}

impl PendingJoin<'_> {
    fn is_current(&self) -> bool {
        *self.slot.lock() == Some(self.ticket)
    }
}

impl Drop for PendingJoin<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if *slot == Some(self.ticket) {
            *slot = None;
        }
    }
}

struct CallInner {
    party_id: PartyId,
    local_id: UserId,
    display_name: String,
    config: CallConfig,
    transport: Arc<dyn PresenceTransport>,
    capture: Arc<dyn MediaCapture>,
    factory: Arc<dyn PeerFactory>,
    sinks: MediaSinkRegistry,
    roster: Arc<RwLock<PresenceRoster>>,
    speaking: Arc<watch::Sender<bool>>,
    /// Never held while waiting on a capture device
    call: Mutex<Option<ActiveCall>>,
    joining: parking_lot::Mutex<Option<u64>>,
    next_call_id: AtomicU64,
}

/// Joins, runs and leaves the party's mesh call
///
/// Cheap to clone; clones share the same call.
#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<CallInner>,
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("party_id", &self.inner.party_id)
            .field("local_id", &self.inner.local_id)
            .finish_non_exhaustive()
    }
}

impl CallCoordinator {
    pub fn new(
        party_id: PartyId,
        local_id: UserId,
        display_name: impl Into<String>,
        config: CallConfig,
        transport: Arc<dyn PresenceTransport>,
        capture: Arc<dyn MediaCapture>,
        factory: Arc<dyn PeerFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let (speaking, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(CallInner {
                party_id,
                local_id,
                display_name: display_name.into(),
                config,
                transport,
                capture,
                factory,
                sinks: MediaSinkRegistry::new(),
                roster: Arc::new(RwLock::new(PresenceRoster::new())),
                speaking: Arc::new(speaking),
                call: Mutex::new(None),
                joining: parking_lot::Mutex::new(None),
                next_call_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn topic(&self) -> String {
        self.inner.config.topic_for(self.inner.party_id.as_str())
    }

    /// Enter the call
    ///
    /// Acquires the microphone (and camera when `with_video`), subscribes to
    /// the call topic, publishes initial attributes and starts voice activity
    /// detection. Already being in the call, or already joining it, is a
    /// no-op.
    ///
    /// Capture may wait on a permission prompt. Meanwhile the coordinator
    /// stays responsive and `leave_call` cancels the join.
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] when capture access is refused and
    /// [`Error::JoinCancelled`] when the call was left while capturing. In
    /// both cases every resource acquired so far is released.
    #[instrument(skip_all, fields(party_id = %self.inner.party_id, user_id = %self.inner.local_id, with_video = with_video))]
    pub async fn join_call(&self, with_video: bool) -> Result<()> {
        let inner = &self.inner;
        let pending = {
            let call = inner.call.lock().await;
            if call.is_some() {
                debug!("Already in call");
                return Ok(());
            }
            let mut joining = inner.joining.lock();
            if joining.is_some() {
                debug!("Join already in progress");
                return Ok(());
            }
            let ticket = inner.next_call_id.fetch_add(1, Ordering::Relaxed);
            *joining = Some(ticket);
            PendingJoin {
                slot: &inner.joining,
                ticket,
            }
        };

        let (audio, video) = self.open_media(with_video).await?;

        let mut call = inner.call.lock().await;
        if !pending.is_current() {
            stop_tracks(&audio, video.as_ref());
            info!("Call left while joining, capture released");
            return Err(Error::JoinCancelled);
        }

        match self
            .start_call(pending.ticket, audio.clone(), video.clone(), with_video)
            .await
        {
            Ok(active) => {
                *call = Some(active);
                info!(topic = %self.topic(), "Joined call");
                Ok(())
            }
            Err(e) => {
                stop_tracks(&audio, video.as_ref());
                Err(e)
            }
        }
    }

    /// Leave the call; a no-op when not in one
    ///
    /// Cancels a join that is still capturing. Otherwise releases capture
    /// devices, then closes every peer connection, then unsubscribes the
    /// presence topic.
    #[instrument(skip_all, fields(party_id = %self.inner.party_id, user_id = %self.inner.local_id))]
    pub async fn leave_call(&self) -> Result<()> {
        let call = {
            let mut call = self.inner.call.lock().await;
            if self.inner.joining.lock().take().is_some() {
                debug!("Pending join cancelled");
            }
            call.take()
        };
        let Some(call) = call else {
            return Ok(());
        };

        // Nothing may react to signaling from here on
        call.task.abort();

        call.stop_media();
        call.peers.close_all().await;
        if let Err(e) = call.channel.close().await {
            warn!("Presence unsubscribe failed: {}", e);
        }

        self.inner.sinks.clear();
        *self.inner.roster.write() = PresenceRoster::new();
        self.inner.speaking.send_replace(false);
        info!("Left call");
        Ok(())
    }

    /// Flip the microphone's enabled flag and republish
    ///
    /// Returns the new muted state. The track stays attached, so peers
    /// receive silence rather than a dropped stream.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let call = self.inner.call.lock().await;
        let call = call.as_ref().ok_or(Error::NotInCall)?;

        let muted = call.audio.is_enabled();
        call.audio.set_enabled(!muted);
        publish(&call.channel, &call.entry, |entry| entry.is_muted = muted).await;
        info!(muted, "Microphone toggled");
        Ok(muted)
    }

    /// Turn the camera on or off and republish
    ///
    /// In a call without video this acquires the camera and attaches the
    /// new track to every live peer connection, which renegotiates them.
    /// Returns the new video-enabled state.
    ///
    /// # Errors
    ///
    /// [`Error::NotInCall`] also when the call is left while the camera is
    /// still opening; the camera is released then.
    pub async fn toggle_video(&self) -> Result<bool> {
        let call_id = {
            let call = self.inner.call.lock().await;
            let call = call.as_ref().ok_or(Error::NotInCall)?;
            if let Some(video) = &call.video {
                let enabled = !video.is_enabled();
                video.set_enabled(enabled);
                publish(&call.channel, &call.entry, |entry| {
                    entry.is_video_enabled = enabled
                })
                .await;
                return Ok(enabled);
            }
            call.id
        };

        let track = Arc::new(
            self.open_track(TrackKind::Video, self.inner.local_id.as_str())
                .await?,
        );

        let mut call = self.inner.call.lock().await;
        let call = match call.as_mut() {
            Some(call) if call.id == call_id => call,
            _ => {
                track.stop();
                debug!("Call ended while the camera was opening");
                return Err(Error::NotInCall);
            }
        };
        if let Some(video) = &call.video {
            // Another toggle added a camera first
            track.stop();
            return Ok(video.is_enabled());
        }

        if let Err(e) = call.peers.attach_track(track.clone()).await {
            track.stop();
            return Err(e);
        }
        call.video = Some(track);
        info!(peers = call.peers.peer_count(), "Camera added to call");

        publish(&call.channel, &call.entry, |entry| {
            entry.is_video_enabled = true
        })
        .await;
        Ok(true)
    }

    pub async fn is_in_call(&self) -> bool {
        self.inner.call.lock().await.is_some()
    }

    /// Local flag from the voice activity detector
    pub fn is_speaking(&self) -> bool {
        *self.inner.speaking.borrow()
    }

    /// Receiver notified whenever the local speaking flag flips
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.inner.speaking.subscribe()
    }

    /// Remote participants with their latest attributes, ordered by id
    pub fn participants(&self) -> Vec<CallParticipant> {
        self.inner
            .roster
            .read()
            .others(self.inner.local_id.as_str())
            .map(|(id, entry)| CallParticipant {
                id: id.to_string(),
                entry: entry.clone(),
            })
            .collect()
    }

    /// Remote media currently available, ordered by participant id
    pub fn remote_streams(&self) -> Vec<RemoteStream> {
        self.inner.sinks.snapshot()
    }

    pub fn remote_stream(&self, participant_id: &str) -> Option<RemoteStream> {
        self.inner.sinks.get(participant_id)
    }

    pub async fn peer_count(&self) -> usize {
        match self.inner.call.lock().await.as_ref() {
            Some(call) => call.peers.peer_count(),
            None => 0,
        }
    }

    /// Attributes currently published for the local participant
    pub async fn local_entry(&self) -> Option<PresenceEntry> {
        let call = self.inner.call.lock().await;
        match call.as_ref() {
            Some(call) => Some(call.entry.lock().await.clone()),
            None => None,
        }
    }

    async fn open_media(&self, with_video: bool) -> Result<(Arc<LocalTrack>, Option<Arc<LocalTrack>>)> {
        let stream_id = self.inner.local_id.as_str();
        let audio = Arc::new(self.open_track(TrackKind::Audio, stream_id).await?);
        if !with_video {
            return Ok((audio, None));
        }
        match self.open_track(TrackKind::Video, stream_id).await {
            Ok(video) => Ok((audio, Some(Arc::new(video)))),
            Err(e) => {
                audio.stop();
                Err(e)
            }
        }
    }

    /// Wire captured media into a fresh mesh and presence subscription
    async fn start_call(
        &self,
        id: u64,
        audio: Arc<LocalTrack>,
        video: Option<Arc<LocalTrack>>,
        with_video: bool,
    ) -> Result<ActiveCall> {
        let inner = &self.inner;
        let local_id = inner.local_id.as_str();

        let (peers, outbound) = PeerManager::new(
            local_id,
            inner.factory.clone(),
            &inner.config,
            inner.sinks.clone(),
        )?;
        let peers = Arc::new(peers);
        peers.attach_track(audio.clone()).await?;
        if let Some(video) = &video {
            peers.attach_track(video.clone()).await?;
        }

        let (channel, events) =
            PresenceChannel::open(inner.transport.clone(), self.topic(), local_id).await?;
        let channel = Arc::new(channel);

        let vad = audio
            .audio_tap()
            .map(|tap| VoiceActivityMonitor::start(tap, &inner.config.vad));
        if vad.is_none() {
            debug!("Audio capture has no tap, voice activity disabled");
        }
        let speaking = match &vad {
            Some(vad) => vad.subscribe(),
            None => watch::channel(false).1,
        };

        let entry = Arc::new(Mutex::new(PresenceEntry::joined(
            inner.display_name.clone(),
            with_video,
        )));
        {
            let entry = entry.lock().await;
            if let Err(e) = channel.track(&entry).await {
                warn!("Initial presence publish failed: {}", e);
            }
        }

        let call_loop = CallLoop {
            local_id: local_id.to_string(),
            channel: channel.clone(),
            peers: peers.clone(),
            entry: entry.clone(),
            roster: inner.roster.clone(),
            speaking: inner.speaking.clone(),
        };
        let task = tokio::spawn(call_loop.run(events, outbound, speaking));

        Ok(ActiveCall {
            id,
            channel,
            peers,
            audio,
            video,
            vad,
            entry,
            task,
        })
    }

    async fn open_track(&self, kind: TrackKind, stream_id: &str) -> Result<LocalTrack> {
        match self.inner.capture.open(kind).await {
            Ok(capture) => Ok(LocalTrack::new(kind, stream_id, capture)),
            Err(e) => {
                let err = e.into_error(kind);
                if err.is_permission_denied() {
                    warn!(%kind, "Capture permission denied");
                } else {
                    warn!(%kind, "Capture failed: {}", err);
                }
                Err(err)
            }
        }
    }
}

/// Apply `update` to the published attributes and republish them whole
async fn publish(
    channel: &PresenceChannel,
    entry: &Mutex<PresenceEntry>,
    update: impl FnOnce(&mut PresenceEntry),
) {
    let mut entry = entry.lock().await;
    update(&mut entry);
    if let Err(e) = channel.track(&entry).await {
        warn!(topic = %channel.topic(), "Presence publish failed: {}", e);
    }
}

/// State the per-call event loop works on
struct CallLoop {
    local_id: String,
    channel: Arc<PresenceChannel>,
    peers: Arc<PeerManager>,
    entry: Arc<Mutex<PresenceEntry>>,
    roster: Arc<RwLock<PresenceRoster>>,
    speaking: Arc<watch::Sender<bool>>,
}

impl CallLoop {
    async fn run(
        self,
        mut events: PresenceEvents,
        mut outbound: mpsc::UnboundedReceiver<SignalEnvelope>,
        mut speaking: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        warn!("Presence subscription ended");
                        break;
                    };
                    self.on_presence(event, &events).await;
                }
                Some(envelope) = outbound.recv() => {
                    if let Err(e) = self
                        .channel
                        .broadcast(&envelope.target_id, SIGNAL_EVENT, &envelope)
                        .await
                    {
                        debug!(target = %envelope.target_id, "Signal broadcast failed: {}", e);
                    }
                }
                Ok(()) = speaking.changed() => {
                    let is_speaking = *speaking.borrow_and_update();
                    self.speaking.send_replace(is_speaking);
                    publish(&self.channel, &self.entry, |entry| entry.is_speaking = is_speaking)
                        .await;
                }
            }
        }
    }

    async fn on_presence(&self, event: ChannelEvent, events: &PresenceEvents) {
        match event {
            // Members already in the call initiate toward the newcomer
            ChannelEvent::Joined(id) if id != self.local_id => {
                if let Err(e) = self.peers.connect(&id).await {
                    debug!(remote_id = %id, "Not connecting: {}", e);
                }
            }
            ChannelEvent::Joined(_) => {}
            ChannelEvent::Left(id) => {
                self.peers.disconnect(&id).await;
            }
            ChannelEvent::Sync(diff) => {
                for id in &diff.left {
                    self.peers.disconnect(id).await;
                }
                *self.roster.write() = events.roster().clone();
            }
            ChannelEvent::Message {
                from,
                event,
                payload,
            } if event == SIGNAL_EVENT => match serde_json::from_value::<SignalEnvelope>(payload) {
                Ok(envelope) if envelope.sender_id == from => {
                    if let Err(e) = self.peers.handle_signal(envelope).await {
                        debug!(remote_id = %from, "Signal not applied: {}", e);
                    }
                }
                Ok(envelope) => warn!(
                    from = %from,
                    claimed = %envelope.sender_id,
                    "Signal sender mismatch, dropped"
                ),
                Err(e) => warn!(from = %from, "Malformed signal dropped: {}", e),
            },
            ChannelEvent::Message { from, event, .. } => {
                debug!(from = %from, event = %event, "Ignoring presence message");
            }
        }
    }
}
