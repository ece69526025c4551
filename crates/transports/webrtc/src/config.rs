//! Configuration types for calls

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use watchparty_core::VadConfig;

/// Configuration for a [`crate::CallCoordinator`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallConfig {
    /// STUN server URLs (at least two independent endpoints)
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,

    /// Maximum peers in mesh (default: 10, max: 10)
    #[serde(default = "default_max_peers")]
    pub max_peers: u32,

    /// Presence topic prefix; the topic is `{prefix}:{party_id}` (default: "call")
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Seconds before an unconnected peer is reported (default: 30)
    #[serde(default = "default_negotiation_timeout_secs")]
    pub negotiation_timeout_secs: u64,

    /// Voice activity sampling
    #[serde(default)]
    pub vad: VadConfig,
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

fn default_max_peers() -> u32 {
    10
}

fn default_topic_prefix() -> String {
    "call".to_string()
}

fn default_negotiation_timeout_secs() -> u64 {
    30
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            max_peers: default_max_peers(),
            topic_prefix: default_topic_prefix(),
            negotiation_timeout_secs: default_negotiation_timeout_secs(),
            vad: VadConfig::default(),
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - fewer than two STUN servers are given, or one is not a `stun:`/`stuns:` URL
    /// - `max_peers` is not in 1..=10
    /// - `topic_prefix` is empty or contains `:`
    /// - `negotiation_timeout_secs` is zero
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "At least two STUN servers are required, got {}",
                self.stun_servers.len()
            )));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "stun_servers must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if self.max_peers == 0 || self.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                self.max_peers
            )));
        }

        if self.topic_prefix.is_empty() || self.topic_prefix.contains(':') {
            return Err(Error::InvalidConfig(format!(
                "topic_prefix must be non-empty and free of ':', got {:?}",
                self.topic_prefix
            )));
        }

        if self.negotiation_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "negotiation_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.vad.validate()?;
        Ok(())
    }

    /// Preset for small voice-only rooms
    ///
    /// Caps the mesh at six peers; every participant uploads one stream per
    /// peer, so audio-only rooms are the ones that scale that far.
    ///
    /// # Example
    ///
    /// ```
    /// use watchparty_webrtc::config::CallConfig;
    ///
    /// let config = CallConfig::voice_only();
    /// assert!(config.validate().is_ok());
    /// assert_eq!(config.max_peers, 6);
    /// ```
    pub fn voice_only() -> Self {
        Self {
            max_peers: 6,
            ..Default::default()
        }
    }

    /// Replace the STUN endpoints
    pub fn with_stun_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stun_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    /// Presence topic carrying call signaling for `party_id`
    pub fn topic_for(&self, party_id: &str) -> String {
        format!("{}:{}", self.topic_prefix, party_id)
    }
}
