//! In-process party backend

use super::backend::PartyBackend;
use super::model::{
    ChatMessage, Episode, EpisodeId, Participant, Party, PartyId, PlaybackUpdate, UserId,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of each change-notification channel
const NOTIFY_CAPACITY: usize = 64;

#[derive(Default)]
struct Store {
    parties: HashMap<PartyId, Party>,
    participants: HashMap<PartyId, Vec<Participant>>,
    episodes: HashMap<EpisodeId, Episode>,
    messages: HashMap<PartyId, Vec<ChatMessage>>,
    party_notify: HashMap<PartyId, broadcast::Sender<Party>>,
    message_notify: HashMap<PartyId, broadcast::Sender<ChatMessage>>,
}

impl Store {
    fn party(&self, party_id: &PartyId) -> Result<&Party> {
        self.parties
            .get(party_id)
            .ok_or_else(|| Error::PartyNotFound(party_id.to_string()))
    }

    fn active_party_mut(&mut self, party_id: &PartyId) -> Result<&mut Party> {
        let party = self
            .parties
            .get_mut(party_id)
            .ok_or_else(|| Error::PartyNotFound(party_id.to_string()))?;
        if !party.is_active {
            return Err(Error::PartyEnded(party_id.to_string()));
        }
        Ok(party)
    }

    fn notify_party(&self, party: &Party) {
        if let Some(tx) = self.party_notify.get(&party.id) {
            // No receivers is fine: nobody is watching this party right now.
            let _ = tx.send(party.clone());
        }
    }
}

/// In-memory [`PartyBackend`]
///
/// Enforces host authority on every playback write, exactly like the
/// server-side policy it stands in for.
///
/// ```
/// use watchparty_core::{InMemoryPartyBackend, PartyBackend, PlaybackUpdate, UserId};
///
/// # tokio_test::block_on(async {
/// let backend = InMemoryPartyBackend::new();
/// let host = UserId::new("host");
/// let party = backend.create_party(&host, "Host", None).await.unwrap();
///
/// let err = backend
///     .update_playback(&party.id, &UserId::new("guest"), PlaybackUpdate::position(10.0, true))
///     .await
///     .unwrap_err();
/// assert!(err.is_authority_violation());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryPartyBackend {
    store: Arc<RwLock<Store>>,
}

impl InMemoryPartyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the episode catalog
    pub fn insert_episode(&self, episode: Episode) {
        self.store
            .write()
            .episodes
            .insert(episode.id.clone(), episode);
    }

    /// Hard-delete a party with its participants and messages
    pub fn purge_party(&self, party_id: &PartyId) -> bool {
        let mut store = self.store.write();
        store.participants.remove(party_id);
        store.messages.remove(party_id);
        store.party_notify.remove(party_id);
        store.message_notify.remove(party_id);
        store.parties.remove(party_id).is_some()
    }

    /// Chat history in append order
    pub fn messages(&self, party_id: &PartyId) -> Vec<ChatMessage> {
        self.store
            .read()
            .messages
            .get(party_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PartyBackend for InMemoryPartyBackend {
    async fn create_party(
        &self,
        host: &UserId,
        display_name: &str,
        episode_id: Option<EpisodeId>,
    ) -> Result<Party> {
        let mut store = self.store.write();

        if let Some(ref id) = episode_id {
            if !store.episodes.contains_key(id) {
                return Err(Error::EpisodeNotFound(id.to_string()));
            }
        }

        let now = Utc::now();
        let party = Party {
            id: PartyId::generate(),
            host_id: host.clone(),
            episode_id,
            current_time_seconds: 0,
            is_playing: false,
            is_active: true,
            created_at: now,
        };

        store.participants.insert(
            party.id.clone(),
            vec![Participant {
                party_id: party.id.clone(),
                user_id: host.clone(),
                display_name: display_name.to_string(),
                is_host: true,
                joined_at: now,
            }],
        );
        store
            .party_notify
            .insert(party.id.clone(), broadcast::channel(NOTIFY_CAPACITY).0);
        store
            .message_notify
            .insert(party.id.clone(), broadcast::channel(NOTIFY_CAPACITY).0);
        store.parties.insert(party.id.clone(), party.clone());

        info!(party_id = %party.id, host = %host, "Created party");

        Ok(party)
    }

    async fn get_party(&self, party_id: &PartyId) -> Result<Party> {
        self.store.read().party(party_id).cloned()
    }

    async fn update_playback(
        &self,
        party_id: &PartyId,
        caller: &UserId,
        update: PlaybackUpdate,
    ) -> Result<Party> {
        let mut store = self.store.write();

        if let Some(ref id) = update.episode_id {
            if !store.episodes.contains_key(id) {
                return Err(Error::EpisodeNotFound(id.to_string()));
            }
        }

        let party = store.active_party_mut(party_id)?;

        if !party.is_host(caller) {
            warn!(party_id = %party_id, caller = %caller, "Rejected playback write from non-host");
            return Err(Error::NotHost {
                party_id: party_id.to_string(),
                user_id: caller.to_string(),
            });
        }

        if let Some(secs) = update.current_time_seconds {
            party.current_time_seconds = secs;
        }
        if let Some(playing) = update.is_playing {
            party.is_playing = playing;
        }
        if let Some(episode_id) = update.episode_id {
            party.episode_id = Some(episode_id);
        }

        let updated = party.clone();
        debug!(
            party_id = %party_id,
            time = updated.current_time_seconds,
            playing = updated.is_playing,
            "Playback state updated"
        );
        store.notify_party(&updated);

        Ok(updated)
    }

    async fn end_party(&self, party_id: &PartyId, caller: &UserId) -> Result<()> {
        let mut store = self.store.write();
        let party = store.active_party_mut(party_id)?;

        if !party.is_host(caller) {
            return Err(Error::NotHost {
                party_id: party_id.to_string(),
                user_id: caller.to_string(),
            });
        }

        party.is_active = false;
        party.is_playing = false;
        let ended = party.clone();
        store.notify_party(&ended);

        info!(party_id = %party_id, "Party ended by host");
        Ok(())
    }

    async fn subscribe_party(&self, party_id: &PartyId) -> Result<broadcast::Receiver<Party>> {
        let store = self.store.read();
        store.party(party_id)?;
        store
            .party_notify
            .get(party_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| Error::PartyNotFound(party_id.to_string()))
    }

    async fn join_party(
        &self,
        party_id: &PartyId,
        user: &UserId,
        display_name: &str,
    ) -> Result<Participant> {
        let mut store = self.store.write();
        let host_id = store.active_party_mut(party_id)?.host_id.clone();

        let members = store.participants.entry(party_id.clone()).or_default();
        if let Some(existing) = members.iter().find(|p| &p.user_id == user) {
            return Ok(existing.clone());
        }

        let participant = Participant {
            party_id: party_id.clone(),
            user_id: user.clone(),
            display_name: display_name.to_string(),
            is_host: &host_id == user,
            joined_at: Utc::now(),
        };
        members.push(participant.clone());

        debug!(party_id = %party_id, user = %user, "Participant joined");
        Ok(participant)
    }

    async fn leave_party(&self, party_id: &PartyId, user: &UserId) -> Result<()> {
        let mut store = self.store.write();
        store.party(party_id)?;

        let members = store.participants.entry(party_id.clone()).or_default();
        let before = members.len();
        members.retain(|p| &p.user_id != user);

        if members.len() == before {
            return Err(Error::ParticipantNotFound {
                party_id: party_id.to_string(),
                user_id: user.to_string(),
            });
        }

        debug!(party_id = %party_id, user = %user, "Participant left");
        Ok(())
    }

    async fn participants(&self, party_id: &PartyId) -> Result<Vec<Participant>> {
        let store = self.store.read();
        store.party(party_id)?;
        Ok(store
            .participants
            .get(party_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_episode(&self, episode_id: &EpisodeId) -> Result<Episode> {
        self.store
            .read()
            .episodes
            .get(episode_id)
            .cloned()
            .ok_or_else(|| Error::EpisodeNotFound(episode_id.to_string()))
    }

    async fn list_episodes(&self, series_id: &str) -> Result<Vec<Episode>> {
        Ok(self
            .store
            .read()
            .episodes
            .values()
            .filter(|e| e.series_id == series_id)
            .cloned()
            .collect())
    }

    async fn post_message(
        &self,
        party_id: &PartyId,
        user: &UserId,
        body: &str,
    ) -> Result<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::InvalidData("chat message is empty".to_string()));
        }

        let mut store = self.store.write();
        store.active_party_mut(party_id)?;

        let display_name = store
            .participants
            .get(party_id)
            .and_then(|members| members.iter().find(|p| &p.user_id == user))
            .map(|p| p.display_name.clone())
            .ok_or_else(|| Error::ParticipantNotFound {
                party_id: party_id.to_string(),
                user_id: user.to_string(),
            })?;

        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            party_id: party_id.clone(),
            user_id: user.clone(),
            display_name,
            body: body.to_string(),
            sent_at: Utc::now(),
        };

        store
            .messages
            .entry(party_id.clone())
            .or_default()
            .push(message.clone());
        if let Some(tx) = store.message_notify.get(party_id) {
            let _ = tx.send(message.clone());
        }

        Ok(message)
    }

    async fn subscribe_messages(
        &self,
        party_id: &PartyId,
    ) -> Result<broadcast::Receiver<ChatMessage>> {
        let store = self.store.read();
        store.party(party_id)?;
        store
            .message_notify
            .get(party_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| Error::PartyNotFound(party_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn episode(id: &str, season: u32, number: u32) -> Episode {
        Episode {
            id: EpisodeId::new(id),
            series_id: "series".to_string(),
            season_number: season,
            episode_number: number,
            title: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_party_makes_creator_host() {
        let backend = InMemoryPartyBackend::new();
        let host = UserId::new("host");
        let party = backend.create_party(&host, "Host", None).await.unwrap();

        assert!(party.is_active);
        assert!(party.episode_id.is_none());
        let members = backend.participants(&party.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].is_host);
    }

    #[tokio::test]
    async fn test_only_host_can_update_playback() {
        let backend = InMemoryPartyBackend::new();
        let host = UserId::new("host");
        let guest = UserId::new("guest");
        let party = backend.create_party(&host, "Host", None).await.unwrap();

        let err = backend
            .update_playback(&party.id, &guest, PlaybackUpdate::position(50.0, true))
            .await
            .unwrap_err();
        assert!(err.is_authority_violation());

        let unchanged = backend.get_party(&party.id).await.unwrap();
        assert_eq!(unchanged.current_time_seconds, 0);
        assert!(!unchanged.is_playing);

        let updated = backend
            .update_playback(&party.id, &host, PlaybackUpdate::position(50.4, true))
            .await
            .unwrap();
        assert_eq!(updated.current_time_seconds, 50);
        assert!(updated.is_playing);
    }

    #[tokio::test]
    async fn test_updates_notify_subscribers() {
        let backend = InMemoryPartyBackend::new();
        let host = UserId::new("host");
        let party = backend.create_party(&host, "Host", None).await.unwrap();
        let mut rx = backend.subscribe_party(&party.id).await.unwrap();

        backend
            .update_playback(&party.id, &host, PlaybackUpdate::position(300.0, false))
            .await
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.current_time_seconds, 300);
        assert!(!change.is_playing);
    }

    #[tokio::test]
    async fn test_ended_party_rejects_writes() {
        let backend = InMemoryPartyBackend::new();
        let host = UserId::new("host");
        let party = backend.create_party(&host, "Host", None).await.unwrap();

        assert_err!(backend.end_party(&party.id, &UserId::new("guest")).await);
        assert_ok!(backend.end_party(&party.id, &host).await);

        let err = assert_err!(
            backend
                .update_playback(&party.id, &host, PlaybackUpdate::position(1.0, true))
                .await
        );
        assert!(matches!(err, Error::PartyEnded(_)));
        assert!(!backend.get_party(&party.id).await.unwrap().is_active);

        assert!(backend.purge_party(&party.id));
        assert!(matches!(
            backend.get_party(&party.id).await,
            Err(Error::PartyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_episode_change_requires_known_episode() {
        let backend = InMemoryPartyBackend::new();
        backend.insert_episode(episode("e1", 1, 1));
        let host = UserId::new("host");
        let party = backend
            .create_party(&host, "Host", Some(EpisodeId::new("e1")))
            .await
            .unwrap();

        let err = backend
            .update_playback(&party.id, &host, PlaybackUpdate::advance_to("missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EpisodeNotFound(_)));

        backend.insert_episode(episode("e2", 1, 2));
        let advanced = backend
            .update_playback(&party.id, &host, PlaybackUpdate::advance_to("e2".into()))
            .await
            .unwrap();
        assert_eq!(advanced.episode_id, Some(EpisodeId::new("e2")));
        assert_eq!(advanced.current_time_seconds, 0);
        assert!(!advanced.is_playing);
    }

    #[tokio::test]
    async fn test_join_is_idempotent_and_leave_removes() {
        let backend = InMemoryPartyBackend::new();
        let host = UserId::new("host");
        let guest = UserId::new("guest");
        let party = backend.create_party(&host, "Host", None).await.unwrap();

        let first = backend.join_party(&party.id, &guest, "Guest").await.unwrap();
        let second = backend.join_party(&party.id, &guest, "Guest").await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_host);
        assert_eq!(backend.participants(&party.id).await.unwrap().len(), 2);

        backend.leave_party(&party.id, &guest).await.unwrap();
        assert!(backend.leave_party(&party.id, &guest).await.is_err());
        assert_eq!(backend.participants(&party.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_requires_membership_and_body() {
        let backend = InMemoryPartyBackend::new();
        let host = UserId::new("host");
        let party = backend.create_party(&host, "Host", None).await.unwrap();
        let mut rx = backend.subscribe_messages(&party.id).await.unwrap();

        assert!(backend.post_message(&party.id, &host, "   ").await.is_err());
        assert!(backend
            .post_message(&party.id, &UserId::new("stranger"), "hi")
            .await
            .is_err());

        let sent = backend.post_message(&party.id, &host, " hello ").await.unwrap();
        assert_eq!(sent.body, "hello");
        assert_eq!(sent.display_name, "Host");
        assert_eq!(rx.recv().await.unwrap().id, sent.id);
        assert_eq!(backend.messages(&party.id).len(), 1);
    }
}
