//! Fixed-interval polling of board chat messages and members.
//!
//! Board chat is not driven by the socket. While a board view is open, one
//! task loads both lists immediately and then once per interval, replacing
//! each list wholesale with the server's copy. Messages carry stable server
//! ids, so a full replace never duplicates entries.
//!
//! A failed fetch is logged and leaves that list as it was; the other list
//! still updates and the next tick runs on schedule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use frames::{BoardId, ChatMember, ChatMessage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::ApiError;

/// Shortest accepted polling interval; smaller values are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of board chat state.
#[async_trait]
pub trait BoardFeed: Send + Sync {
    async fn messages(&self, board_id: BoardId) -> Result<Vec<ChatMessage>, ApiError>;

    async fn members(&self, board_id: BoardId) -> Result<Vec<ChatMember>, ApiError>;
}

/// Latest polled state of one board's chat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoardChatView {
    pub messages: Vec<ChatMessage>,
    pub members: Vec<ChatMember>,
    /// Completed polling ticks, including failed ones.
    pub ticks: u64,
}

/// Running poller; stops when dropped.
#[derive(Debug)]
pub struct BoardPoller {
    board_id: BoardId,
    view: watch::Receiver<BoardChatView>,
    task: JoinHandle<()>,
}

impl BoardPoller {
    /// Start polling `board_id`. The first load happens immediately.
    #[must_use]
    pub fn spawn(feed: Arc<dyn BoardFeed>, board_id: BoardId, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(%board_id, ?interval, "poll: interval too short; using minimum");
        }
        let interval = interval.max(MIN_POLL_INTERVAL);
        let (tx, rx) = watch::channel(BoardChatView::default());
        let task = tokio::spawn(poll_loop(feed, board_id, interval, tx));
        Self { board_id, view: rx, task }
    }

    #[must_use]
    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> BoardChatView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BoardChatView> {
        self.view.clone()
    }

    pub fn stop(self) {}
}

impl Drop for BoardPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_loop(feed: Arc<dyn BoardFeed>, board_id: BoardId, interval: Duration, view: watch::Sender<BoardChatView>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let (messages, members) = tokio::join!(feed.messages(board_id), feed.members(board_id));
        let messages = messages
            .inspect_err(|e| warn!(%board_id, error = %e, "poll: messages fetch failed"))
            .ok();
        let members = members
            .inspect_err(|e| warn!(%board_id, error = %e, "poll: members fetch failed"))
            .ok();

        view.send_modify(|current| {
            if let Some(messages) = messages {
                current.messages = messages;
            }
            if let Some(members) = members {
                current.members = members;
            }
            current.ticks += 1;
        });
        debug!(%board_id, "poll: tick complete");
    }
}

#[cfg(test)]
#[path = "poller_test.rs"]
mod tests;
