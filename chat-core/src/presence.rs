//! Per-peer presence state.
//!
//! Ephemeral, process-lifetime only. A peer is `unknown` until the first
//! status event arrives; after that, last write wins - the events carry no
//! timestamp, so arrival order is the only order there is.

use chat_types::{PresenceStatus, UserId};
use std::collections::HashMap;

/// Tracks the last reported status of every peer.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    statuses: HashMap<UserId, PresenceStatus>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status event for a peer. Last write wins.
    pub fn apply(&mut self, user: UserId, status: PresenceStatus) {
        self.statuses.insert(user, status);
    }

    /// The last reported status, or `None` if no event has arrived yet.
    pub fn status(&self, user: &UserId) -> Option<PresenceStatus> {
        self.statuses.get(user).copied()
    }

    /// Convenience: whether the peer's last reported status is online.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.status(user) == Some(PresenceStatus::Online)
    }

    /// Drop all state. Used on account logout.
    pub fn clear(&mut self) {
        self.statuses.clear();
    }
}
