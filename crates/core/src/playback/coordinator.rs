//! Playback synchronization coordinator

use super::countdown::{AutoAdvanceCountdown, CountdownState};
use super::heartbeat::HeartbeatThrottle;
use super::player::{PlayerCommand, PlayerEvent, VideoPlayer};
use super::reconcile::{AuthoritativeState, DriftReconciler, LocalState, SyncPhase};
use crate::config::SyncConfig;
use crate::party::{
    next_episode, Episode, EpisodeId, Party, PartyBackend, PartyId, PlaybackUpdate, UserId,
};
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Authority of the local user over the party's playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sole writer of the authoritative state
    Host,
    /// Read-only; drives its player from the authoritative state
    Follower,
}

struct SyncState {
    heartbeat: HeartbeatThrottle,
    reconciler: DriftReconciler,
    episode: Option<EpisodeId>,
    next_episode: Option<Episode>,
}

struct Inner {
    backend: Arc<dyn PartyBackend>,
    party_id: PartyId,
    user_id: UserId,
    role: Role,
    player: Arc<dyn VideoPlayer>,
    config: SyncConfig,
    state: Mutex<SyncState>,
    countdown: Mutex<Option<AutoAdvanceCountdown>>,
    syncing: Arc<watch::Sender<bool>>,
    syncing_generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
    party_ended: AtomicBool,
}

/// Keeps one local player converged on the party's authoritative state
///
/// As host it pushes throttled heartbeats and edge-triggered updates and
/// runs the auto-advance countdown. As follower it reconciles every
/// authoritative change through a [`DriftReconciler`]. Cloning shares the
/// same coordinator.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("party_id", &self.inner.party_id)
            .field("user_id", &self.inner.user_id)
            .field("role", &self.inner.role)
            .finish()
    }
}

impl PlaybackCoordinator {
    /// Create a coordinator for `user_id` in `party_id`
    ///
    /// The role is fixed here from the party's host identity.
    #[instrument(skip_all, fields(party = %party_id, user = %user_id))]
    pub async fn new(
        backend: Arc<dyn PartyBackend>,
        party_id: PartyId,
        user_id: UserId,
        player: Arc<dyn VideoPlayer>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let party = backend.get_party(&party_id).await?;
        let role = if party.is_host(&user_id) {
            Role::Host
        } else {
            Role::Follower
        };
        let next = lookahead(backend.as_ref(), party.episode_id.as_ref()).await;

        info!(?role, "Playback coordinator created");

        let (syncing, _) = watch::channel(false);
        let inner = Inner {
            state: Mutex::new(SyncState {
                heartbeat: HeartbeatThrottle::new(config.heartbeat_interval()),
                reconciler: DriftReconciler::new(config.drift_threshold_secs),
                episode: party.episode_id.clone(),
                next_episode: next,
            }),
            backend,
            party_id,
            user_id,
            role,
            player,
            config,
            countdown: Mutex::new(None),
            syncing: Arc::new(syncing),
            syncing_generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            party_ended: AtomicBool::new(false),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn party_id(&self) -> &PartyId {
        &self.inner.party_id
    }

    /// Lookahead for the current episode
    pub fn next_episode(&self) -> Option<Episode> {
        self.inner.state.lock().next_episode.clone()
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.inner.state.lock().reconciler.phase()
    }

    /// Receiver of the transient "syncing" indicator
    pub fn syncing(&self) -> watch::Receiver<bool> {
        self.inner.syncing.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        *self.inner.syncing.borrow()
    }

    pub fn countdown_state(&self) -> CountdownState {
        self.inner
            .countdown
            .lock()
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(CountdownState::Idle)
    }

    /// Cancel a running auto-advance countdown
    pub fn cancel_auto_advance(&self) {
        if let Some(countdown) = self.inner.countdown.lock().as_ref() {
            countdown.cancel();
        }
    }

    /// Advance now instead of waiting for the countdown (host only)
    pub fn skip_to_next(&self) {
        if self.inner.role != Role::Host {
            return;
        }
        if let Some(countdown) = self.inner.countdown.lock().as_ref() {
            countdown.skip_now();
        }
    }

    /// Write host-authored playback state
    ///
    /// A no-op for followers: they never attempt a write.
    pub async fn push_playback(&self, update: PlaybackUpdate) -> Result<()> {
        if self.inner.role != Role::Host {
            debug!("Follower playback write suppressed");
            return Ok(());
        }
        if self.is_shut_down() || self.has_party_ended() || update.is_empty() {
            return Ok(());
        }
        self.inner
            .backend
            .update_playback(&self.inner.party_id, &self.inner.user_id, update)
            .await?;
        Ok(())
    }

    /// React to one event from the local player
    pub async fn handle_player_event(&self, event: PlayerEvent) -> Result<()> {
        if self.is_shut_down() || self.has_party_ended() {
            return Ok(());
        }
        match self.inner.role {
            Role::Host => self.host_player_event(event).await,
            Role::Follower => {
                self.follower_player_event(event);
                Ok(())
            }
        }
    }

    /// React to one authoritative change notification
    ///
    /// Applying the same row twice is harmless. Once a row marks the party
    /// ended, every later row is ignored, including redelivered older ones.
    pub async fn handle_party_update(&self, party: Party) -> Result<()> {
        if self.is_shut_down() || self.has_party_ended() {
            return Ok(());
        }

        if !party.is_active {
            self.on_party_ended(&party.id);
            return Ok(());
        }

        let episode_changed = {
            let mut state = self.inner.state.lock();
            if state.episode != party.episode_id {
                state.episode = party.episode_id.clone();
                state.reconciler.reset_for_episode();
                true
            } else {
                false
            }
        };

        if episode_changed {
            self.on_episode_changed(party.episode_id.as_ref()).await;
        }

        if self.inner.role == Role::Follower {
            let auth = AuthoritativeState {
                time_secs: party.current_time_seconds as f64,
                is_playing: party.is_playing,
            };
            let local = self.local_state();
            let commands = self.inner.state.lock().reconciler.on_authoritative(auth, local);
            self.apply(&commands);
        }

        Ok(())
    }

    /// Drive the coordinator from `player_events` and the party's change feed
    ///
    /// The current party row is applied right after subscribing, so a late
    /// joiner starts from the latest state.
    ///
    /// The player is handed the party's current episode first; any later
    /// episode change loads again through the change feed.
    pub async fn spawn(&self, mut player_events: mpsc::UnboundedReceiver<PlayerEvent>) -> Result<()> {
        let mut updates = self.inner.backend.subscribe_party(&self.inner.party_id).await?;
        let initial = self.inner.state.lock().episode.clone();
        if let Some(episode) = initial {
            debug!(episode = %episode, "Loading initial episode");
            self.inner.player.load(&episode);
        }
        let current = self.inner.backend.get_party(&self.inner.party_id).await?;
        self.handle_party_update(current).await?;

        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = player_events.recv() => match event {
                        Some(event) => {
                            if let Err(e) = this.handle_player_event(event).await {
                                warn!(error = %e, "Player event handling failed");
                            }
                        }
                        None => break,
                    },
                    update = updates.recv() => match update {
                        Ok(party) => {
                            if let Err(e) = this.handle_party_update(party).await {
                                warn!(error = %e, "Party update handling failed");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Party change feed lagged, re-reading");
                            match this.inner.backend.get_party(&this.inner.party_id).await {
                                Ok(party) => {
                                    if let Err(e) = this.handle_party_update(party).await {
                                        warn!(error = %e, "Party update handling failed");
                                    }
                                }
                                Err(e) => warn!(error = %e, "Party re-read failed"),
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
                if this.is_shut_down() {
                    break;
                }
            }
            debug!("Playback coordinator loop ended");
        });

        if let Some(previous) = self.inner.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop heartbeats, countdown and the event loop immediately
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.state.lock().heartbeat.stop();
        self.abort_countdown();
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        self.inner.syncing.send_replace(false);
        info!(party = %self.inner.party_id, "Playback coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Whether an ended-party row has been applied
    pub fn has_party_ended(&self) -> bool {
        self.inner.party_ended.load(Ordering::Acquire)
    }

    fn on_party_ended(&self, party_id: &PartyId) {
        if self.inner.party_ended.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(party = %party_id, "Party ended, stopping sync");
        self.inner.state.lock().heartbeat.stop();
        self.abort_countdown();
        if self.inner.role == Role::Follower {
            self.inner.player.pause();
        }
    }

    async fn host_player_event(&self, event: PlayerEvent) -> Result<()> {
        let player = &self.inner.player;
        let update = match event {
            PlayerEvent::TimeUpdate(time) => {
                let due = self.inner.state.lock().heartbeat.on_time_update();
                if !due {
                    return Ok(());
                }
                PlaybackUpdate::position(time, !player.is_paused())
            }
            PlayerEvent::Play | PlayerEvent::Pause | PlayerEvent::Seeked => {
                if !self.inner.state.lock().heartbeat.force() {
                    return Ok(());
                }
                let playing = match event {
                    PlayerEvent::Play => true,
                    PlayerEvent::Pause => false,
                    _ => !player.is_paused(),
                };
                PlaybackUpdate::position(player.current_time(), playing)
            }
            PlayerEvent::Ended => {
                self.start_countdown();
                return Ok(());
            }
            PlayerEvent::CanSeek => return Ok(()),
        };
        self.push_playback(update).await
    }

    fn follower_player_event(&self, event: PlayerEvent) {
        let commands = match event {
            PlayerEvent::CanSeek => {
                let local = self.local_state();
                self.inner.state.lock().reconciler.on_ready(local)
            }
            PlayerEvent::Seeked => self.inner.state.lock().reconciler.on_seeked(),
            _ => return,
        };
        self.apply(&commands);
    }

    fn start_countdown(&self) {
        if !self.inner.config.auto_advance_enabled {
            return;
        }
        let Some(next) = self.next_episode() else {
            debug!("Media ended with no next episode");
            return;
        };

        let mut slot = self.inner.countdown.lock();
        if matches!(slot.as_ref().map(|c| c.state()), Some(CountdownState::Running { .. })) {
            return;
        }

        let backend = self.inner.backend.clone();
        let party_id = self.inner.party_id.clone();
        let user_id = self.inner.user_id.clone();
        *slot = Some(AutoAdvanceCountdown::start(
            next,
            self.inner.config.auto_advance_countdown_secs,
            move |next| async move {
                if let Err(e) = backend
                    .update_playback(&party_id, &user_id, PlaybackUpdate::advance_to(next.id))
                    .await
                {
                    warn!(error = %e, "Auto-advance update rejected");
                }
            },
        ));
    }

    fn abort_countdown(&self) {
        if let Some(countdown) = self.inner.countdown.lock().take() {
            countdown.abort();
        }
    }

    async fn on_episode_changed(&self, episode: Option<&EpisodeId>) {
        info!(episode = ?episode.map(|e| e.as_str()), "Episode changed");

        // A finished countdown has done its job; a running one is stale.
        if let Some(countdown) = self.inner.countdown.lock().take() {
            countdown.cancel();
        }

        if let Some(id) = episode {
            self.inner.player.load(id);
        }

        let next = lookahead(self.inner.backend.as_ref(), episode).await;
        let mut state = self.inner.state.lock();
        // Another change may have landed while the lookahead was computed.
        if state.episode.as_ref() == episode {
            state.next_episode = next;
        }
    }

    fn local_state(&self) -> LocalState {
        LocalState {
            time_secs: self.inner.player.current_time(),
            is_playing: !self.inner.player.is_paused(),
        }
    }

    fn apply(&self, commands: &[PlayerCommand]) {
        if commands.is_empty() {
            return;
        }
        if commands.iter().any(PlayerCommand::is_seek) {
            self.begin_syncing();
        }
        for command in commands {
            debug!(?command, "Applying player command");
            if let Err(e) = command.apply(self.inner.player.as_ref()) {
                warn!(?command, error = %e, "Player refused command");
            }
        }
    }

    // The indicator stays up for a fixed window after the latest correction.
    fn begin_syncing(&self) {
        let generation = self.inner.syncing_generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.syncing.send_replace(true);

        let syncing = self.inner.syncing.clone();
        let current = self.inner.syncing_generation.clone();
        let window = self.inner.config.syncing_indicator();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if current.load(Ordering::Acquire) == generation {
                syncing.send_replace(false);
            }
        });
    }
}

async fn lookahead(backend: &dyn PartyBackend, episode: Option<&EpisodeId>) -> Option<Episode> {
    let id = episode?;
    let current = match backend.get_episode(id).await {
        Ok(episode) => episode,
        Err(e) => {
            warn!(episode = %id, error = %e, "Lookahead: episode lookup failed");
            return None;
        }
    };
    match backend.list_episodes(&current.series_id).await {
        Ok(catalog) => next_episode(&current, &catalog),
        Err(e) => {
            warn!(series = %current.series_id, error = %e, "Lookahead: catalog lookup failed");
            None
        }
    }
}
