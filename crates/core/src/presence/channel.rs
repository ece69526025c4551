//! One subscription to a presence topic

use super::roster::{PresenceRoster, RosterDiff};
use super::{PresenceEntry, PresenceEvent, PresenceTransport};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Decoded event yielded by [`PresenceEvents::next`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A full snapshot was applied; carries what changed (possibly nothing)
    Sync(RosterDiff),
    Joined(String),
    Left(String),
    /// Point-to-point message from another member
    Message {
        from: String,
        event: String,
        payload: Value,
    },
}

/// Handle used to publish on a subscribed presence topic
pub struct PresenceChannel {
    transport: Arc<dyn PresenceTransport>,
    topic: String,
    local_id: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for PresenceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceChannel")
            .field("topic", &self.topic)
            .field("local_id", &self.local_id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl PresenceChannel {
    /// Subscribe to `topic` as `local_id`
    ///
    /// Returns after the subscription is confirmed, so the first `track`
    /// is never lost.
    pub async fn open(
        transport: Arc<dyn PresenceTransport>,
        topic: impl Into<String>,
        local_id: impl Into<String>,
    ) -> Result<(Self, PresenceEvents)> {
        let topic = topic.into();
        let local_id = local_id.into();

        let rx = transport.subscribe(&topic, &local_id).await?;
        info!(topic = %topic, member = %local_id, "Presence channel subscribed");

        let events = PresenceEvents {
            rx,
            roster: PresenceRoster::new(),
        };
        let channel = Self {
            transport,
            topic,
            local_id,
            closed: AtomicBool::new(false),
        };
        Ok((channel, events))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish our attributes, overwriting the previous payload
    pub async fn track(&self, entry: &PresenceEntry) -> Result<()> {
        self.ensure_open()?;
        let attributes = serde_json::to_value(entry)?;
        self.transport
            .track(&self.topic, &self.local_id, attributes)
            .await
    }

    /// Send `payload` to `target` under `event`
    ///
    /// Delivery is best-effort: a target that is not subscribed never sees it.
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        target: &str,
        event: &str,
        payload: &T,
    ) -> Result<()> {
        self.ensure_open()?;
        let payload = serde_json::to_value(payload)?;
        self.transport
            .broadcast(&self.topic, &self.local_id, target, event, payload)
            .await
    }

    /// Unsubscribe; later calls are no-ops
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(topic = %self.topic, member = %self.local_id, "Closing presence channel");
        self.transport.unsubscribe(&self.topic, &self.local_id).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ChannelClosed(self.topic.clone()))
        } else {
            Ok(())
        }
    }
}

/// Receiving half of a presence subscription
#[derive(Debug)]
pub struct PresenceEvents {
    rx: mpsc::UnboundedReceiver<PresenceEvent>,
    roster: PresenceRoster,
}

impl PresenceEvents {
    /// Next event, or `None` once the subscription is gone
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        let event = self.rx.recv().await?;
        Some(match event {
            PresenceEvent::Sync { members } => ChannelEvent::Sync(self.roster.apply_sync(&members)),
            PresenceEvent::Join { member_id } => ChannelEvent::Joined(member_id),
            PresenceEvent::Leave { member_id } => ChannelEvent::Left(member_id),
            PresenceEvent::Broadcast {
                from,
                event,
                payload,
            } => ChannelEvent::Message {
                from,
                event,
                payload,
            },
        })
    }

    /// Membership as of the last applied snapshot
    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }
}
