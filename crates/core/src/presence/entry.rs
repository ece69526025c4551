//! Presence attribute record

use serde::{Deserialize, Serialize};

/// Current schema version of [`PresenceEntry`]
pub const PRESENCE_VERSION: u32 = 1;

/// Attributes a participant publishes on a presence topic
///
/// Every field has a default so a member that joined but has not tracked
/// anything yet (or published an older payload) is still representable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceEntry {
    pub version: u32,
    pub display_name: String,
    pub is_muted: bool,
    pub is_video_enabled: bool,
    pub is_speaking: bool,
    /// Milliseconds since the Unix epoch at which the member joined the call
    #[serde(rename = "joinedAt")]
    pub joined_at_ms: i64,
}

impl Default for PresenceEntry {
    fn default() -> Self {
        Self {
            version: PRESENCE_VERSION,
            display_name: String::new(),
            is_muted: false,
            is_video_enabled: false,
            is_speaking: false,
            joined_at_ms: 0,
        }
    }
}

impl PresenceEntry {
    /// Attributes published right after joining a call
    pub fn joined(display_name: impl Into<String>, with_video: bool) -> Self {
        Self {
            display_name: display_name.into(),
            is_video_enabled: with_video,
            joined_at_ms: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }
}
