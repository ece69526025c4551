//! In-process presence service

use super::{PresenceEvent, PresenceSnapshot, PresenceTransport};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct Member {
    tx: mpsc::UnboundedSender<PresenceEvent>,
    attributes: Option<Value>,
}

#[derive(Default)]
struct Topic {
    members: BTreeMap<String, Member>,
}

impl Topic {
    fn snapshot(&self) -> PresenceSnapshot {
        self.members
            .iter()
            .map(|(id, m)| (id.clone(), m.attributes.clone()))
            .collect()
    }

    fn sync_all(&self) {
        let members = self.snapshot();
        for member in self.members.values() {
            let _ = member.tx.send(PresenceEvent::Sync {
                members: members.clone(),
            });
        }
    }

    fn send_to_others(&self, except: &str, event: &PresenceEvent) {
        for (id, member) in &self.members {
            if id != except {
                let _ = member.tx.send(event.clone());
            }
        }
    }
}

/// [`PresenceTransport`] backed by process memory
///
/// Delivers the same event shapes as the realtime service: `join`/`leave` to
/// the other members, a full `sync` to everyone after each change, and
/// target-only broadcasts that are dropped when the target is absent.
#[derive(Clone, Default)]
pub struct InMemoryPresenceHub {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl InMemoryPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current member ids of `topic`, ordered
    pub fn members(&self, topic: &str) -> Vec<String> {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-send a full snapshot to every member, as after a transport resubscribe
    pub fn resync(&self, topic: &str) {
        if let Some(t) = self.topics.lock().get(topic) {
            debug!(topic = %topic, "Presence resync");
            t.sync_all();
        }
    }
}

#[async_trait]
impl PresenceTransport for InMemoryPresenceHub {
    async fn subscribe(
        &self,
        topic: &str,
        member_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<PresenceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock();
        let t = topics.entry(topic.to_string()).or_default();

        let rejoin = t.members.contains_key(member_id);
        if !rejoin {
            t.send_to_others(
                member_id,
                &PresenceEvent::Join {
                    member_id: member_id.to_string(),
                },
            );
        }
        t.members.insert(
            member_id.to_string(),
            Member {
                tx,
                attributes: None,
            },
        );
        t.sync_all();

        debug!(topic = %topic, member = %member_id, rejoin, "Presence subscribe");
        Ok(rx)
    }

    async fn track(&self, topic: &str, member_id: &str, attributes: Value) -> Result<()> {
        let mut topics = self.topics.lock();
        let Some(t) = topics.get_mut(topic) else {
            debug!(topic = %topic, member = %member_id, "Dropping track on unknown topic");
            return Ok(());
        };
        let Some(member) = t.members.get_mut(member_id) else {
            debug!(topic = %topic, member = %member_id, "Dropping track from unsubscribed member");
            return Ok(());
        };
        member.attributes = Some(attributes);
        t.sync_all();
        Ok(())
    }

    async fn broadcast(
        &self,
        topic: &str,
        from: &str,
        target: &str,
        event: &str,
        payload: Value,
    ) -> Result<()> {
        let topics = self.topics.lock();
        match topics.get(topic).and_then(|t| t.members.get(target)) {
            Some(member) => {
                let _ = member.tx.send(PresenceEvent::Broadcast {
                    from: from.to_string(),
                    event: event.to_string(),
                    payload,
                });
            }
            None => {
                debug!(topic = %topic, from = %from, target = %target, "Broadcast target absent, dropped");
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, member_id: &str) -> Result<()> {
        let mut topics = self.topics.lock();
        let Some(t) = topics.get_mut(topic) else {
            return Ok(());
        };
        if t.members.remove(member_id).is_none() {
            return Ok(());
        }

        t.send_to_others(
            member_id,
            &PresenceEvent::Leave {
                member_id: member_id.to_string(),
            },
        );
        t.sync_all();

        if t.members.is_empty() {
            topics.remove(topic);
        }
        debug!(topic = %topic, member = %member_id, "Presence unsubscribe");
        Ok(())
    }
}
