//! Chat feed
//!
//! Message notifications are delivered at-least-once. The feed keeps them in
//! arrival order and drops redeliveries by message id.

use crate::party::ChatMessage;
use std::collections::HashSet;

/// Arrival-ordered, de-duplicated chat history for one party
#[derive(Debug, Default)]
pub struct ChatFeed {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl ChatFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delivery; returns `false` for a duplicate
    pub fn apply(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Seed the feed from a history read, skipping anything already applied
    pub fn extend(&mut self, history: impl IntoIterator<Item = ChatMessage>) -> usize {
        history.into_iter().filter(|m| self.apply(m.clone())).count()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
