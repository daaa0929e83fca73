//! Typing-indicator tracker.
//!
//! Each sender keeps a single last-seen timestamp; "is typing" is
//! `now - last_seen < ttl`. A refresh simply moves the timestamp, so there is
//! no per-notice timer that could expire a newer notice early.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use frames::UserId;

pub const DEFAULT_TYPING_TTL: Duration = Duration::from_millis(3000);

/// Shared per-session typing state. Clones share one map.
#[derive(Clone, Debug)]
pub struct TypingTracker {
    ttl: Duration,
    last_seen: Arc<Mutex<HashMap<UserId, Instant>>>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TTL)
    }
}

impl TypingTracker {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, last_seen: Arc::default() }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, Instant>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_typing(&self, sender: UserId) {
        self.mark_typing_at(sender, Instant::now());
    }

    pub fn mark_typing_at(&self, sender: UserId, now: Instant) {
        self.entries().insert(sender, now);
    }

    pub fn clear(&self, sender: UserId) {
        self.entries().remove(&sender);
    }

    #[must_use]
    pub fn is_typing(&self, sender: UserId) -> bool {
        self.is_typing_at(sender, Instant::now())
    }

    #[must_use]
    pub fn is_typing_at(&self, sender: UserId, now: Instant) -> bool {
        self.entries()
            .get(&sender)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.ttl)
    }

    /// Senders currently typing, in ascending id order.
    #[must_use]
    pub fn typing_senders_at(&self, now: Instant) -> Vec<UserId> {
        let mut senders: Vec<_> = self
            .entries()
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) < self.ttl)
            .map(|(id, _)| *id)
            .collect();
        senders.sort_unstable();
        senders
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, seen| now.saturating_duration_since(*seen) < self.ttl);
        before - entries.len()
    }
}

#[cfg(test)]
#[path = "typing_test.rs"]
mod tests;
