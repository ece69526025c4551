//! Party, participant, episode and chat records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a shared viewing session
    PartyId
);
string_id!(
    /// Identity of a user (also the participant id on presence topics)
    UserId
);
string_id!(
    /// Identifier of a catalog episode
    EpisodeId
);

/// A shared viewing session
///
/// `current_time_seconds` and `is_playing` are authored by `host_id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub host_id: UserId,
    /// Active episode, `None` while the host has not chosen one yet
    pub episode_id: Option<EpisodeId>,
    pub current_time_seconds: u32,
    pub is_playing: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Party {
    pub fn is_host(&self, user: &UserId) -> bool {
        &self.host_id == user
    }
}

/// Partial update of the host-authored playback fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<EpisodeId>,
}

impl PlaybackUpdate {
    /// Heartbeat payload: floored position plus play state
    pub fn position(local_time_secs: f64, is_playing: bool) -> Self {
        Self {
            current_time_seconds: Some(floor_seconds(local_time_secs)),
            is_playing: Some(is_playing),
            episode_id: None,
        }
    }

    /// Switch episode and rewind to a paused start
    pub fn advance_to(episode_id: EpisodeId) -> Self {
        Self {
            current_time_seconds: Some(0),
            is_playing: Some(false),
            episode_id: Some(episode_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_time_seconds.is_none() && self.is_playing.is_none() && self.episode_id.is_none()
    }
}

pub(crate) fn floor_seconds(secs: f64) -> u32 {
    if secs.is_finite() && secs > 0.0 {
        secs.floor().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// Membership of a user in a party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub party_id: PartyId,
    pub user_id: UserId,
    pub display_name: String,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

/// Catalog episode with its season ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub series_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub title: String,
}

/// Append-only chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub party_id: PartyId,
    pub user_id: UserId,
    pub display_name: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}
