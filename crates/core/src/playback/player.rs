//! Local video player seam

use crate::party::EpisodeId;
use crate::Result;

/// The local video element, driven by commands and observed through events
///
/// Decoding and rendering live behind this trait. Implementations report
/// state changes as [`PlayerEvent`]s on a channel handed to the coordinator.
pub trait VideoPlayer: Send + Sync {
    /// Current position in seconds
    fn current_time(&self) -> f64;

    fn is_paused(&self) -> bool;

    /// Start playback; may be refused (autoplay policy, no media)
    fn play(&self) -> Result<()>;

    fn pause(&self);

    /// Begin a seek; completion is reported with [`PlayerEvent::Seeked`]
    fn seek(&self, secs: f64);

    /// Switch to another episode's media; readiness is reported with
    /// [`PlayerEvent::CanSeek`]
    fn load(&self, episode_id: &EpisodeId);
}

/// Event emitted by a [`VideoPlayer`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    /// Periodic position report while playing
    TimeUpdate(f64),
    Play,
    Pause,
    /// A seek finished
    Seeked,
    /// Media loaded far enough to accept a seek
    CanSeek,
    /// Playback reached end of media
    Ended,
}

/// Command issued to a [`VideoPlayer`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Seek(f64),
}

impl PlayerCommand {
    pub fn apply(&self, player: &dyn VideoPlayer) -> Result<()> {
        match *self {
            PlayerCommand::Play => player.play(),
            PlayerCommand::Pause => {
                player.pause();
                Ok(())
            }
            PlayerCommand::Seek(secs) => {
                player.seek(secs);
                Ok(())
            }
        }
    }

    pub fn is_seek(&self) -> bool {
        matches!(self, PlayerCommand::Seek(_))
    }
}
