//! Follower-side drift reconciliation
//!
//! [`DriftReconciler`] is a pure state machine: it takes authoritative and
//! local player state and returns the player commands to issue. It holds no
//! player and no clock, so the convergence rules can be driven directly from
//! tests.

use super::player::PlayerCommand;

/// Host-authored playback state as seen by a follower
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthoritativeState {
    pub time_secs: f64,
    pub is_playing: bool,
}

/// Local player state at the moment of reconciliation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalState {
    pub time_secs: f64,
    pub is_playing: bool,
}

/// Reconciliation phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncPhase {
    /// Within threshold; only play/pause is mirrored
    Converged,
    /// A hard correction is in flight: paused, seeking to `target`, and
    /// resuming on seek completion if `resume` is set
    Correcting { target: f64, resume: bool },
}

/// Heartbeat-and-threshold reconciler
#[derive(Debug, Clone)]
pub struct DriftReconciler {
    threshold_secs: f64,
    phase: SyncPhase,
    ready: bool,
    joined: bool,
    latest: Option<AuthoritativeState>,
}

impl DriftReconciler {
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            threshold_secs,
            phase: SyncPhase::Converged,
            ready: false,
            joined: false,
            latest: None,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_correcting(&self) -> bool {
        matches!(self.phase, SyncPhase::Correcting { .. })
    }

    /// The player can accept a seek
    ///
    /// The first readiness after a join or episode switch performs the
    /// initial-join seek against the latest known state, whatever the drift.
    pub fn on_ready(&mut self, local: LocalState) -> Vec<PlayerCommand> {
        if self.ready {
            return Vec::new();
        }
        self.ready = true;
        match self.latest {
            Some(auth) => self.initial_join(auth, local),
            None => Vec::new(),
        }
    }

    /// A new authoritative state arrived
    pub fn on_authoritative(
        &mut self,
        auth: AuthoritativeState,
        local: LocalState,
    ) -> Vec<PlayerCommand> {
        self.latest = Some(auth);
        if !self.ready {
            return Vec::new();
        }
        if !self.joined {
            return self.initial_join(auth, local);
        }

        match self.phase {
            SyncPhase::Correcting { target, .. } => {
                let moved = (auth.time_secs - target).abs() > self.threshold_secs;
                let target = if moved { auth.time_secs } else { target };
                self.phase = SyncPhase::Correcting {
                    target,
                    resume: auth.is_playing,
                };
                if moved {
                    vec![PlayerCommand::Seek(target)]
                } else {
                    Vec::new()
                }
            }
            SyncPhase::Converged => {
                let drift = (local.time_secs - auth.time_secs).abs();
                if drift > self.threshold_secs {
                    self.correct(auth, local)
                } else {
                    mirror_play_state(auth, local)
                }
            }
        }
    }

    /// The player finished a seek
    pub fn on_seeked(&mut self) -> Vec<PlayerCommand> {
        match self.phase {
            SyncPhase::Correcting { resume, .. } => {
                self.phase = SyncPhase::Converged;
                if resume {
                    vec![PlayerCommand::Play]
                } else {
                    Vec::new()
                }
            }
            SyncPhase::Converged => Vec::new(),
        }
    }

    /// New media is loading; wait for readiness and re-join
    pub fn reset_for_episode(&mut self) {
        self.phase = SyncPhase::Converged;
        self.ready = false;
        self.joined = false;
    }

    fn initial_join(&mut self, auth: AuthoritativeState, local: LocalState) -> Vec<PlayerCommand> {
        self.joined = true;
        self.correct(auth, local)
    }

    // Pause (if playing) and seek; play only resumes after Seeked so the
    // follower never plays from the stale position.
    fn correct(&mut self, auth: AuthoritativeState, local: LocalState) -> Vec<PlayerCommand> {
        let mut commands = Vec::with_capacity(2);
        if local.is_playing {
            commands.push(PlayerCommand::Pause);
        }
        commands.push(PlayerCommand::Seek(auth.time_secs));
        self.phase = SyncPhase::Correcting {
            target: auth.time_secs,
            resume: auth.is_playing,
        };
        commands
    }
}

fn mirror_play_state(auth: AuthoritativeState, local: LocalState) -> Vec<PlayerCommand> {
    match (auth.is_playing, local.is_playing) {
        (true, false) => vec![PlayerCommand::Play],
        (false, true) => vec![PlayerCommand::Pause],
        _ => Vec::new(),
    }
}
