//! Per-session notification state: unread ledger, typing tracker, notifier.
//!
//! DESIGN
//! ======
//! One `NotificationCenter` is built per logged-in session and handed (as a
//! cheap clone) to every connection. Frames reach the ledger and tracker only
//! through [`NotificationCenter::handle_private_message`] and
//! [`NotificationCenter::handle_typing`], which own the viewer/recipient
//! gating rules. Nothing here is global; tests build isolated instances.
//!
//! ERROR HANDLING
//! ==============
//! Opening a conversation zeroes the local count first and then tells the
//! backend. A failed backend call is logged and returned; the local count
//! stays zero until the next [`NotificationCenter::sync_snapshot`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use frames::{PrivateMessage, TypingNotice, UserId};
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::ledger::{UnreadLedger, UnreadSnapshot};
use crate::notify::{Notification, NotificationPermission, Notifier};
use crate::typing::TypingTracker;

/// Backend calls the center needs.
#[async_trait]
pub trait UnreadBackend: Send + Sync {
    async fn fetch_unread(&self) -> Result<UnreadSnapshot, ApiError>;

    async fn mark_read(&self, user_id: UserId) -> Result<(), ApiError>;
}

/// What happened to one inbound private message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Counted as unread for its sender; carries the conversation's new count.
    Counted { unread: u64 },
    /// The conversation is open on screen; nothing counted or announced.
    ConversationOpen,
    /// Sent by the viewer.
    OwnMessage,
    /// Addressed to somebody else.
    NotForViewer,
}

#[derive(Clone)]
pub struct NotificationCenter {
    viewer_id: UserId,
    ledger: UnreadLedger,
    typing: TypingTracker,
    notifier: Arc<dyn Notifier>,
    open_conversation: Arc<Mutex<Option<UserId>>>,
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("viewer_id", &self.viewer_id)
            .field("ledger", &self.ledger)
            .field("open_conversation", &self.open_conversation_id())
            .finish_non_exhaustive()
    }
}

impl NotificationCenter {
    #[must_use]
    pub fn new(viewer_id: UserId, typing_ttl: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            viewer_id,
            ledger: UnreadLedger::new(),
            typing: TypingTracker::new(typing_ttl),
            notifier,
            open_conversation: Arc::default(),
        }
    }

    #[must_use]
    pub fn viewer_id(&self) -> UserId {
        self.viewer_id
    }

    #[must_use]
    pub fn ledger(&self) -> &UnreadLedger {
        &self.ledger
    }

    #[must_use]
    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    #[must_use]
    pub fn is_typing(&self, sender: UserId) -> bool {
        self.typing.is_typing(sender)
    }

    #[must_use]
    pub fn permission(&self) -> NotificationPermission {
        self.notifier.permission()
    }

    /// Explicit user request for desktop-notification permission.
    pub fn request_permission(&self) -> NotificationPermission {
        let permission = self.notifier.request_permission();
        info!(?permission, "notify: permission requested");
        permission
    }

    // =========================================================================
    // SNAPSHOT / READ STATE
    // =========================================================================

    /// Replace the ledger with the backend's snapshot. Returns the new total.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the ledger is left untouched.
    pub async fn sync_snapshot(&self, backend: &dyn UnreadBackend) -> Result<u64, ApiError> {
        let snapshot = backend.fetch_unread().await?;
        let total = self.ledger.apply_snapshot(&snapshot);
        info!(total, conversations = snapshot.conversations.len(), "ledger: snapshot applied");
        Ok(total)
    }

    /// Mark `user_id`'s conversation as on screen and read. Returns the count cleared.
    ///
    /// # Errors
    ///
    /// Returns the backend's mark-read failure after the local reset has happened.
    pub async fn open_conversation(&self, user_id: UserId, backend: &dyn UnreadBackend) -> Result<u64, ApiError> {
        *self.open_slot() = Some(user_id);
        let cleared = self.ledger.reset(Some(user_id));
        debug!(%user_id, cleared, "ledger: conversation opened");

        if let Err(e) = backend.mark_read(user_id).await {
            warn!(%user_id, error = %e, "ledger: mark-read failed; local count already cleared");
            return Err(e);
        }
        Ok(cleared)
    }

    pub fn close_conversation(&self) {
        *self.open_slot() = None;
    }

    #[must_use]
    pub fn open_conversation_id(&self) -> Option<UserId> {
        *self.open_slot()
    }

    fn open_slot(&self) -> std::sync::MutexGuard<'_, Option<UserId>> {
        self.open_conversation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // FRAME HANDLING
    // =========================================================================

    /// Apply one inbound private message.
    ///
    /// `frame_recipient` is the envelope-level addressee; the payload's own
    /// `recipient_id` is used when the envelope has none. A message with no
    /// addressee at all is treated as addressed to the viewer.
    pub fn handle_private_message(&self, frame_recipient: Option<UserId>, msg: &PrivateMessage) -> MessageOutcome {
        if msg.sender_id == self.viewer_id {
            return MessageOutcome::OwnMessage;
        }
        if frame_recipient
            .or(msg.recipient_id)
            .is_some_and(|recipient| recipient != self.viewer_id)
        {
            return MessageOutcome::NotForViewer;
        }
        if self.open_conversation_id() == Some(msg.sender_id) {
            return MessageOutcome::ConversationOpen;
        }

        let unread = self.ledger.increment(msg.sender_id);
        self.notifier.play_sound();
        if self.notifier.permission() == NotificationPermission::Granted {
            self.notifier.show(&Notification::for_private_message(msg));
        }
        MessageOutcome::Counted { unread }
    }

    /// Apply one typing notice. Returns whether it was addressed to the viewer.
    pub fn handle_typing(&self, frame_recipient: Option<UserId>, notice: &TypingNotice) -> bool {
        let recipient = notice.recipient_id.or(frame_recipient);
        if recipient != Some(self.viewer_id) || notice.sender_id == self.viewer_id {
            return false;
        }

        if notice.is_typing {
            self.typing.mark_typing(notice.sender_id);
        } else {
            self.typing.clear(notice.sender_id);
        }
        true
    }
}

#[cfg(test)]
#[path = "center_test.rs"]
mod tests;
