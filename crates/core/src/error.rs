//! Error types for the watch party core

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in party, presence and playback operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Party record does not exist
    #[error("Party not found: {0}")]
    PartyNotFound(String),

    /// Episode record does not exist
    #[error("Episode not found: {0}")]
    EpisodeNotFound(String),

    /// Participant is not a member of the party
    #[error("Participant {user_id} not found in party {party_id}")]
    ParticipantNotFound {
        /// Party the lookup targeted
        party_id: String,
        /// Missing participant
        user_id: String,
    },

    /// A non-host identity tried to author playback state
    #[error("User {user_id} is not the host of party {party_id}")]
    NotHost {
        /// Party whose state was targeted
        party_id: String,
        /// Identity that attempted the write
        user_id: String,
    },

    /// The party was ended by its host
    #[error("Party has ended: {0}")]
    PartyEnded(String),

    /// Rejected input (empty chat message, malformed payload)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Presence transport failure
    #[error("Presence error: {0}")]
    Presence(String),

    /// A channel or subscription was already closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Local player rejected a command
    #[error("Player error: {0}")]
    Player(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a host-authority violation
    pub fn is_authority_violation(&self) -> bool {
        matches!(self, Error::NotHost { .. })
    }

    /// Check if this error should be shown to the user
    ///
    /// Only explicit backend rejections surface; transport and sync hiccups
    /// are recovered locally.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::NotHost { .. }
                | Error::PartyEnded(_)
                | Error::PartyNotFound(_)
                | Error::InvalidData(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::ConfigParse(_))
    }
}
