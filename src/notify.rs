//! Local notification side effects for inbound private messages.

use std::sync::{Mutex, PoisonError};

use frames::PrivateMessage;
use tracing::info;

pub const PRIVATE_MESSAGE_TITLE: &str = "New Private Message";

/// Desktop-notification permission, mirroring the platform's three states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotificationPermission {
    #[default]
    Default,
    Granted,
    Denied,
}

/// Content of one desktop notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
}

impl Notification {
    /// Notification for an inbound private message: `"<sender name>: <content>"`.
    #[must_use]
    pub fn for_private_message(msg: &PrivateMessage) -> Self {
        let sender = msg.sender.as_ref();
        let name = sender
            .map(|s| s.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("Someone");
        Self {
            title: PRIVATE_MESSAGE_TITLE.to_owned(),
            body: format!("{name}: {}", msg.content),
            icon: sender.and_then(|s| s.avatar.clone()).filter(|a| !a.is_empty()),
        }
    }
}

/// Sink for sound and desktop notifications.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    /// Ask for desktop-notification permission. Only called on explicit user action.
    fn request_permission(&self) -> NotificationPermission;

    fn play_sound(&self);

    fn show(&self, notification: &Notification);
}

/// Notifier for terminal use: sounds and notifications become log lines.
#[derive(Debug, Default)]
pub struct LogNotifier {
    permission: Mutex<NotificationPermission>,
}

impl LogNotifier {
    #[must_use]
    pub fn new(permission: NotificationPermission) -> Self {
        Self { permission: Mutex::new(permission) }
    }
}

impl Notifier for LogNotifier {
    fn permission(&self) -> NotificationPermission {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_permission(&self) -> NotificationPermission {
        let mut permission = self.permission.lock().unwrap_or_else(PoisonError::into_inner);
        // A prior denial sticks, as on every desktop platform.
        if *permission == NotificationPermission::Default {
            *permission = NotificationPermission::Granted;
        }
        *permission
    }

    fn play_sound(&self) {
        info!("notify: sound");
    }

    fn show(&self, notification: &Notification) {
        info!(title = %notification.title, body = %notification.body, "notify: desktop notification");
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
