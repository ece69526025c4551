//! Playback synchronization
//!
//! The party row carries `{current_time_seconds, is_playing, episode_id}`,
//! written only by the host. The host's [`PlaybackCoordinator`] feeds it from
//! local player events: time updates at most once per heartbeat interval,
//! play/pause/seeked immediately. Every follower's coordinator reconciles its
//! own player against each change notification:
//!
//! 1. mirror play/pause when drift is within the threshold;
//! 2. otherwise pause, seek to the authoritative time and resume after the
//!    seek completes, with a short "syncing" indicator;
//! 3. on first readiness, seek straight to the authoritative time.
//!
//! When the host's media ends and a next episode exists, a cancelable
//! countdown advances the party to it.

mod coordinator;
mod countdown;
mod heartbeat;
mod player;
mod reconcile;
mod sim;

pub use coordinator::{PlaybackCoordinator, Role};
pub use countdown::{AutoAdvanceCountdown, CountdownState};
pub use heartbeat::HeartbeatThrottle;
pub use player::{PlayerCommand, PlayerEvent, VideoPlayer};
pub use reconcile::{AuthoritativeState, DriftReconciler, LocalState, SyncPhase};
pub use sim::SimulatedPlayer;
