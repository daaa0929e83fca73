//! Unread-count ledger for private conversations.
//!
//! DESIGN
//! ======
//! One `Mutex`-guarded state holds per-conversation counts and the running
//! total. Every mutation (snapshot, increment, reset) takes the lock once and
//! updates both together, so `total == sum(conversations)` holds after every
//! call no matter how callers interleave. Handles are cheap clones of one
//! shared `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use frames::UserId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One entry of the backend's unread snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUnread {
    #[serde(alias = "userId", deserialize_with = "frames::flex_id::deserialize")]
    pub user_id: UserId,
    #[serde(alias = "unreadCount", default)]
    pub unread_count: u64,
}

/// Backend unread summary: `{conversations: [{userId, unreadCount}], totalUnread?}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadSnapshot {
    #[serde(default)]
    pub conversations: Vec<ConversationUnread>,
    #[serde(alias = "totalUnread", default, skip_serializing_if = "Option::is_none")]
    pub total_unread: Option<u64>,
}

#[derive(Debug, Default)]
struct LedgerState {
    conversations: HashMap<UserId, u64>,
    total: u64,
    last_message_at: Option<SystemTime>,
}

/// Shared per-session unread counters.
#[derive(Clone, Debug, Default)]
pub struct UnreadLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl UnreadLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace all state with `snapshot`. Returns the new total.
    ///
    /// The total is recomputed from the entries; the server's `totalUnread`
    /// is only compared for logging.
    pub fn apply_snapshot(&self, snapshot: &UnreadSnapshot) -> u64 {
        let mut conversations = HashMap::with_capacity(snapshot.conversations.len());
        for entry in &snapshot.conversations {
            if entry.unread_count > 0 {
                *conversations.entry(entry.user_id).or_insert(0) += entry.unread_count;
            }
        }
        let total = conversations.values().sum();

        if let Some(reported) = snapshot.total_unread {
            if reported != total {
                debug!(reported, computed = total, "ledger: snapshot total disagrees with entries");
            }
        }

        let mut state = self.state();
        state.conversations = conversations;
        state.total = total;
        total
    }

    /// Add one unread message from `user_id`. Returns that conversation's new count.
    pub fn increment(&self, user_id: UserId) -> u64 {
        let mut state = self.state();
        let count = state.conversations.entry(user_id).or_insert(0);
        *count += 1;
        let count = *count;
        state.total += 1;
        state.last_message_at = Some(SystemTime::now());
        count
    }

    /// Zero one conversation, or every conversation when `user_id` is `None`.
    /// Returns how many unread messages were cleared.
    pub fn reset(&self, user_id: Option<UserId>) -> u64 {
        let mut state = self.state();
        match user_id {
            Some(id) => {
                let cleared = state.conversations.remove(&id).unwrap_or(0);
                state.total -= cleared;
                cleared
            }
            None => {
                let cleared = state.total;
                state.conversations.clear();
                state.total = 0;
                cleared
            }
        }
    }

    /// Unread count for one conversation, `0` when absent.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> u64 {
        self.state().conversations.get(&user_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.state().total
    }

    /// Non-zero conversations ordered by user id.
    #[must_use]
    pub fn conversations(&self) -> Vec<(UserId, u64)> {
        let mut entries: Vec<_> = self.state().conversations.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Wall-clock time of the last [`increment`](Self::increment).
    #[must_use]
    pub fn last_message_at(&self) -> Option<SystemTime> {
        self.state().last_message_at
    }
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
