//! Replicated membership table

use super::entry::PresenceEntry;
use super::PresenceSnapshot;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Change produced by applying one full snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub joined: Vec<String>,
    pub left: Vec<String>,
    pub updated: Vec<String>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && self.updated.is_empty()
    }
}

/// Membership of one presence topic as last seen in a full sync
///
/// A snapshot always replaces the table wholesale: members missing from it
/// are gone, whatever partial state was held before.
#[derive(Debug, Clone, Default)]
pub struct PresenceRoster {
    members: BTreeMap<String, PresenceEntry>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table with `snapshot`, returning what changed
    pub fn apply_sync(&mut self, snapshot: &PresenceSnapshot) -> RosterDiff {
        let mut next = BTreeMap::new();
        for (id, attributes) in snapshot {
            next.insert(id.clone(), decode_entry(id, attributes.as_ref()));
        }

        let mut diff = RosterDiff::default();
        for (id, entry) in &next {
            match self.members.get(id) {
                None => diff.joined.push(id.clone()),
                Some(previous) if previous != entry => diff.updated.push(id.clone()),
                Some(_) => {}
            }
        }
        diff.left = self
            .members
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        if !diff.is_empty() {
            debug!(
                joined = diff.joined.len(),
                left = diff.left.len(),
                updated = diff.updated.len(),
                "Presence roster replaced"
            );
        }

        self.members = next;
        diff
    }

    pub fn get(&self, id: &str) -> Option<&PresenceEntry> {
        self.members.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    /// Members other than `local_id`, ordered by id
    pub fn others<'a>(
        &'a self,
        local_id: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a PresenceEntry)> + 'a {
        self.members
            .iter()
            .filter(move |(id, _)| id.as_str() != local_id)
            .map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn decode_entry(id: &str, attributes: Option<&serde_json::Value>) -> PresenceEntry {
    match attributes {
        None => PresenceEntry::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(member = %id, error = %e, "Unreadable presence attributes, using defaults");
            PresenceEntry::default()
        }),
    }
}
