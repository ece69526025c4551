//! Presence channel client
//!
//! A presence topic is a named publish/subscribe channel with two facilities:
//!
//! - a replicated membership table, where each member publishes its own
//!   attribute payload with `track` and every subscriber receives a full
//!   snapshot (`sync`) after any change;
//! - point-to-point `broadcast` messages addressed to one member id, delivered
//!   only to that member's live subscription and never stored.
//!
//! [`PresenceTransport`] is the seam to the realtime service.
//! [`PresenceChannel`] wraps one subscription and [`PresenceEvents`] turns
//! raw transport events into roster changes, replacing the table wholesale
//! on every snapshot.

mod channel;
mod entry;
mod memory;
mod roster;

pub use channel::{ChannelEvent, PresenceChannel, PresenceEvents};
pub use entry::{PresenceEntry, PRESENCE_VERSION};
pub use memory::InMemoryPresenceHub;
pub use roster::{PresenceRoster, RosterDiff};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Full membership map: member id to its tracked attributes
///
/// `None` marks a member that joined but has not tracked anything yet.
pub type PresenceSnapshot = HashMap<String, Option<Value>>;

/// Raw event delivered by a [`PresenceTransport`] subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// Full membership snapshot
    Sync { members: PresenceSnapshot },
    /// A member subscribed after us
    Join { member_id: String },
    /// A member unsubscribed
    Leave { member_id: String },
    /// Point-to-point message addressed to us
    Broadcast {
        from: String,
        event: String,
        payload: Value,
    },
}

/// Realtime service carrying presence topics
#[async_trait]
pub trait PresenceTransport: Send + Sync {
    /// Subscribe `member_id` to `topic`
    ///
    /// Returns once the subscription is confirmed; `track` calls made before
    /// that point may be dropped by the service.
    async fn subscribe(
        &self,
        topic: &str,
        member_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<PresenceEvent>>;

    /// Publish or overwrite `member_id`'s attributes
    async fn track(&self, topic: &str, member_id: &str, attributes: Value) -> Result<()>;

    /// Deliver `payload` to `target` only, if it is currently subscribed
    async fn broadcast(
        &self,
        topic: &str,
        from: &str,
        target: &str,
        event: &str,
        payload: Value,
    ) -> Result<()>;

    async fn unsubscribe(&self, topic: &str, member_id: &str) -> Result<()>;
}
