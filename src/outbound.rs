//! Unified outbound send: socket push first, REST fallback once.
//!
//! DESIGN
//! ======
//! Every user-originated write (private message, board chat message, typing
//! notice) is an [`OutboundCommand`]. [`Outbox::send`] stamps it with a fresh
//! idempotency key, offers it to the push transport, and only when the push
//! is not confirmed written delivers it through the REST fallback with the
//! same key. A push that was queued but never written (socket died, write
//! timed out) therefore still reaches the server over REST, and a late
//! socket copy or a caller retry with [`Outbox::send_with_key`] stays
//! detectable server-side.

use std::sync::Arc;

use async_trait::async_trait;
use frames::{BoardId, FrameKind, OutboundFrame, UserId};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundCommand {
    PrivateMessage { recipient_id: UserId, content: String },
    ChatMessage { board_id: BoardId, content: String },
    Typing { recipient_id: UserId, is_typing: bool },
}

impl OutboundCommand {
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::PrivateMessage { .. } => FrameKind::PrivateMessage,
            Self::ChatMessage { .. } => FrameKind::ChatMessage,
            Self::Typing { .. } => FrameKind::Typing,
        }
    }

    fn content(&self) -> Option<&str> {
        match self {
            Self::PrivateMessage { content, .. } | Self::ChatMessage { content, .. } => Some(content),
            Self::Typing { .. } => None,
        }
    }

    /// Socket frame for this command.
    #[must_use]
    pub fn to_frame(&self, idempotency_key: &str) -> OutboundFrame {
        let (data, board_id) = match self {
            Self::PrivateMessage { recipient_id, content } => {
                (json!({"recipient_id": recipient_id, "content": content}), None)
            }
            Self::ChatMessage { board_id, content } => (json!({"content": content, "sender": "user"}), Some(*board_id)),
            Self::Typing { recipient_id, is_typing } => {
                (json!({"recipient_id": recipient_id, "is_typing": is_typing}), None)
            }
        };
        OutboundFrame::new(self.kind().as_str(), data)
            .with_board_id(board_id)
            .with_idempotency_key(idempotency_key)
    }
}

/// How a command reached the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Pushed,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub idempotency_key: String,
    pub delivery: Delivery,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("rest fallback failed (idempotency key {idempotency_key}): {source}")]
    Fallback {
        idempotency_key: String,
        #[source]
        source: ApiError,
    },
}

/// Socket push. `true` only once the frame was written to an open socket;
/// `false` means it may not have reached the server.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, frame: &OutboundFrame) -> bool;
}

/// Request/response delivery used when the push is unavailable.
#[async_trait]
pub trait FallbackTransport: Send + Sync {
    async fn deliver(&self, command: &OutboundCommand, idempotency_key: &str) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct Outbox {
    push: Option<Arc<dyn PushTransport>>,
    fallback: Arc<dyn FallbackTransport>,
}

impl Outbox {
    #[must_use]
    pub fn new(push: Arc<dyn PushTransport>, fallback: Arc<dyn FallbackTransport>) -> Self {
        Self { push: Some(push), fallback }
    }

    /// Outbox with no socket; every command goes over REST.
    #[must_use]
    pub fn rest_only(fallback: Arc<dyn FallbackTransport>) -> Self {
        Self { push: None, fallback }
    }

    /// Send `command` under a fresh idempotency key.
    ///
    /// # Errors
    ///
    /// [`SendError::EmptyContent`] for blank messages (nothing is sent), or
    /// [`SendError::Fallback`] when the push was unavailable and REST failed.
    pub async fn send(&self, command: &OutboundCommand) -> Result<SendReceipt, SendError> {
        self.send_with_key(command, Uuid::new_v4().to_string()).await
    }

    /// Send `command` under a caller-chosen idempotency key.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_key(
        &self,
        command: &OutboundCommand,
        idempotency_key: String,
    ) -> Result<SendReceipt, SendError> {
        if command.content().is_some_and(|c| c.trim().is_empty()) {
            return Err(SendError::EmptyContent);
        }

        if let Some(push) = &self.push {
            if push.push(&command.to_frame(&idempotency_key)).await {
                debug!(kind = %command.kind(), %idempotency_key, "outbox: pushed");
                return Ok(SendReceipt { idempotency_key, delivery: Delivery::Pushed });
            }
            debug!(kind = %command.kind(), %idempotency_key, "outbox: push not confirmed; using rest");
        }

        match self.fallback.deliver(command, &idempotency_key).await {
            Ok(()) => Ok(SendReceipt { idempotency_key, delivery: Delivery::Fallback }),
            Err(source) => {
                warn!(kind = %command.kind(), %idempotency_key, error = %source, "outbox: rest fallback failed");
                Err(SendError::Fallback { idempotency_key, source })
            }
        }
    }
}

#[cfg(test)]
#[path = "outbound_test.rs"]
mod tests;
