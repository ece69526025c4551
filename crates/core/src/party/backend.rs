//! Persistence/backend contract

use super::model::{
    ChatMessage, Episode, EpisodeId, Participant, Party, PartyId, PlaybackUpdate, UserId,
};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Boundary with the party persistence service
///
/// Implementations must reject [`PartyBackend::update_playback`] from any
/// caller other than the party's host with [`crate::Error::NotHost`]. Change
/// notifications are at-least-once; subscribers apply them idempotently.
#[async_trait]
pub trait PartyBackend: Send + Sync {
    /// Create a party; the creator becomes host and first participant
    async fn create_party(
        &self,
        host: &UserId,
        display_name: &str,
        episode_id: Option<EpisodeId>,
    ) -> Result<Party>;

    async fn get_party(&self, party_id: &PartyId) -> Result<Party>;

    /// Apply a host-authored playback update
    async fn update_playback(
        &self,
        party_id: &PartyId,
        caller: &UserId,
        update: PlaybackUpdate,
    ) -> Result<Party>;

    /// Soft-delete the party (host only)
    async fn end_party(&self, party_id: &PartyId, caller: &UserId) -> Result<()>;

    /// Row-level change notifications for one party
    async fn subscribe_party(&self, party_id: &PartyId) -> Result<broadcast::Receiver<Party>>;

    async fn join_party(
        &self,
        party_id: &PartyId,
        user: &UserId,
        display_name: &str,
    ) -> Result<Participant>;

    async fn leave_party(&self, party_id: &PartyId, user: &UserId) -> Result<()>;

    async fn participants(&self, party_id: &PartyId) -> Result<Vec<Participant>>;

    async fn get_episode(&self, episode_id: &EpisodeId) -> Result<Episode>;

    /// All episodes of a series, in any order
    async fn list_episodes(&self, series_id: &str) -> Result<Vec<Episode>>;

    async fn post_message(
        &self,
        party_id: &PartyId,
        user: &UserId,
        body: &str,
    ) -> Result<ChatMessage>;

    async fn subscribe_messages(
        &self,
        party_id: &PartyId,
    ) -> Result<broadcast::Receiver<ChatMessage>>;
}
