//! Party records and the persistence boundary
//!
//! Persistence itself is external. This module defines the record shapes,
//! the [`PartyBackend`] contract the coordinators talk to, and an in-memory
//! implementation that enforces the single-writer rule the same way the
//! real backend does.

mod backend;
mod lookahead;
mod memory;
mod model;

pub use backend::PartyBackend;
pub use lookahead::next_episode;
pub use memory::InMemoryPartyBackend;
pub use model::{
    ChatMessage, Episode, EpisodeId, Participant, Party, PartyId, PlaybackUpdate, UserId,
};
