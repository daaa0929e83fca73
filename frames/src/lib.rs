//! Shared frame model and JSON codec for the realtime WS transport.
//!
//! This crate owns the wire representation exchanged with the board backend.
//! Inbound frames are decoded into a closed set of kinds; anything outside
//! that set, or a payload missing required fields, is rejected here so the
//! connection layer never has to trust raw `data` shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric user identifier as issued by the backend.
pub type UserId = u64;

/// Numeric board identifier as issued by the backend.
pub type BoardId = u64;

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes were not a JSON object of the expected envelope shape.
    #[error("failed to parse frame json: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope carried no `type` discriminator.
    #[error("frame is missing `type`")]
    MissingType,
    /// The `type` discriminator is not one of the known [`FrameKind`]s.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    /// The `data` payload does not match the shape required by its kind.
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// FRAME KINDS
// =============================================================================

/// Closed set of frame `type` discriminators understood by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Auth,
    PrivateMessage,
    Typing,
    ChatMessage,
    BoardUpdated,
    BoardDeleted,
    MemberJoined,
    MemberRemoved,
    MemberRoleUpdated,
}

impl FrameKind {
    /// Every known kind, in wire-name order.
    pub const ALL: [FrameKind; 9] = [
        FrameKind::Auth,
        FrameKind::PrivateMessage,
        FrameKind::Typing,
        FrameKind::ChatMessage,
        FrameKind::BoardUpdated,
        FrameKind::BoardDeleted,
        FrameKind::MemberJoined,
        FrameKind::MemberRemoved,
        FrameKind::MemberRoleUpdated,
    ];

    /// Wire name used in the `type` field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::PrivateMessage => "private_message",
            Self::Typing => "typing",
            Self::ChatMessage => "chat_message",
            Self::BoardUpdated => "board_updated",
            Self::BoardDeleted => "board_deleted",
            Self::MemberJoined => "member_joined",
            Self::MemberRemoved => "member_removed",
            Self::MemberRoleUpdated => "member_role_updated",
        }
    }

    /// Parse a wire name. Returns `None` for unknown names.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Serde helpers accepting identifiers as either JSON numbers or numeric
/// strings (`7` and `"7"` both decode to `7`).
pub mod flex_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(u64),
        Str(String),
    }

    fn resolve<E: serde::de::Error>(raw: RawId) -> Result<u64, E> {
        match raw {
            RawId::Num(n) => Ok(n),
            RawId::Str(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("invalid identifier `{s}`"))),
        }
    }

    /// Deserialize a required identifier.
    ///
    /// # Errors
    ///
    /// Fails when the value is neither an unsigned integer nor a numeric string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        resolve(RawId::deserialize(deserializer)?)
    }

    /// Deserialize an optional identifier. `null` maps to `None`.
    ///
    /// # Errors
    ///
    /// Fails when a present value is neither an unsigned integer nor a numeric string.
    pub fn option<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawId>::deserialize(deserializer)?
            .map(resolve)
            .transpose()
    }
}

// =============================================================================
// SHARED MODELS
// =============================================================================

/// Minimal user profile embedded in messages and search results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(deserialize_with = "flex_id::deserialize")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// One 1:1 private message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessage {
    #[serde(default, deserialize_with = "flex_id::option")]
    pub id: Option<u64>,
    #[serde(alias = "senderId", deserialize_with = "flex_id::deserialize")]
    pub sender_id: UserId,
    #[serde(default, alias = "recipientId", deserialize_with = "flex_id::option")]
    pub recipient_id: Option<UserId>,
    pub content: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub sender: Option<UserSummary>,
}

/// "X is typing to Y" notice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypingNotice {
    #[serde(alias = "user_id", alias = "senderId", deserialize_with = "flex_id::deserialize")]
    pub sender_id: UserId,
    #[serde(default, alias = "recipientId", deserialize_with = "flex_id::option")]
    pub recipient_id: Option<UserId>,
    #[serde(alias = "typing", alias = "isTyping")]
    pub is_typing: bool,
}

/// Author class of a board chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    #[default]
    User,
    Ai,
}

/// One board-scoped chat message. `id` is server-assigned and stable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "flex_id::deserialize")]
    pub id: u64,
    #[serde(default, deserialize_with = "flex_id::option")]
    pub board_id: Option<BoardId>,
    #[serde(default, deserialize_with = "flex_id::option")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: ChatSender,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// One member of a board's chat roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMember {
    #[serde(alias = "userId", deserialize_with = "flex_id::deserialize")]
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub joined_at: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

// =============================================================================
// INBOUND
// =============================================================================

/// Board-scoped broadcast events carried with an untyped payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardEvent {
    Updated,
    Deleted,
    MemberJoined,
    MemberRemoved,
    MemberRoleUpdated,
}

/// Typed payload of an inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Echo of an `auth` frame. Carries nothing the client uses.
    Auth,
    PrivateMessage(PrivateMessage),
    Typing(TypingNotice),
    ChatMessage(ChatMessage),
    Board(BoardEvent, Value),
}

/// A decoded frame received from the server.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// Board context, if any. The backend's `0` sentinel is normalized to `None`.
    pub board_id: Option<BoardId>,
    /// Originating user, if the server stamped one.
    pub user_id: Option<UserId>,
    /// Addressee of a private frame, if any.
    pub recipient_id: Option<UserId>,
    pub payload: Payload,
}

impl InboundFrame {
    /// The discriminator this frame was decoded from.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match &self.payload {
            Payload::Auth => FrameKind::Auth,
            Payload::PrivateMessage(_) => FrameKind::PrivateMessage,
            Payload::Typing(_) => FrameKind::Typing,
            Payload::ChatMessage(_) => FrameKind::ChatMessage,
            Payload::Board(BoardEvent::Updated, _) => FrameKind::BoardUpdated,
            Payload::Board(BoardEvent::Deleted, _) => FrameKind::BoardDeleted,
            Payload::Board(BoardEvent::MemberJoined, _) => FrameKind::MemberJoined,
            Payload::Board(BoardEvent::MemberRemoved, _) => FrameKind::MemberRemoved,
            Payload::Board(BoardEvent::MemberRoleUpdated, _) => FrameKind::MemberRoleUpdated,
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default, alias = "boardId", deserialize_with = "flex_id::option")]
    board_id: Option<BoardId>,
    #[serde(default, alias = "userId", deserialize_with = "flex_id::option")]
    user_id: Option<UserId>,
    #[serde(default, alias = "recipientId", deserialize_with = "flex_id::option")]
    recipient_id: Option<UserId>,
}

/// Decode one inbound frame from JSON bytes.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON, [`CodecError::MissingType`]
/// / [`CodecError::UnknownType`] for a bad discriminator, and
/// [`CodecError::InvalidPayload`] when `data` lacks required fields.
pub fn decode_frame(bytes: &[u8]) -> Result<InboundFrame, CodecError> {
    let raw: RawFrame = serde_json::from_slice(bytes)?;
    let Some(type_name) = raw.kind else {
        return Err(CodecError::MissingType);
    };
    let Some(kind) = FrameKind::parse(&type_name) else {
        return Err(CodecError::UnknownType(type_name));
    };

    let payload = match kind {
        FrameKind::Auth => Payload::Auth,
        FrameKind::PrivateMessage => Payload::PrivateMessage(typed_payload(kind, raw.data)?),
        FrameKind::Typing => Payload::Typing(typed_payload(kind, raw.data)?),
        FrameKind::ChatMessage => Payload::ChatMessage(typed_payload(kind, raw.data)?),
        FrameKind::BoardUpdated => Payload::Board(BoardEvent::Updated, raw.data),
        FrameKind::BoardDeleted => Payload::Board(BoardEvent::Deleted, raw.data),
        FrameKind::MemberJoined => Payload::Board(BoardEvent::MemberJoined, raw.data),
        FrameKind::MemberRemoved => Payload::Board(BoardEvent::MemberRemoved, raw.data),
        FrameKind::MemberRoleUpdated => Payload::Board(BoardEvent::MemberRoleUpdated, raw.data),
    };

    Ok(InboundFrame {
        board_id: non_zero(raw.board_id),
        user_id: non_zero(raw.user_id),
        recipient_id: non_zero(raw.recipient_id),
        payload,
    })
}

fn typed_payload<T: serde::de::DeserializeOwned>(kind: FrameKind, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|source| CodecError::InvalidPayload { kind: kind.as_str(), source })
}

fn non_zero(id: Option<u64>) -> Option<u64> {
    id.filter(|value| *value != 0)
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// A frame sent by the client: `{type, data, boardId?, idempotencyKey?}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(rename = "boardId", skip_serializing_if = "Option::is_none")]
    pub board_id: Option<BoardId>,
    #[serde(rename = "idempotencyKey", skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl OutboundFrame {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data, board_id: None, idempotency_key: None }
    }

    #[must_use]
    pub fn with_board_id(mut self, board_id: Option<BoardId>) -> Self {
        self.board_id = board_id;
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Serialize)]
struct AuthFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    token: &'a str,
}

/// Encode an outbound frame as JSON text.
#[must_use]
pub fn encode_frame(frame: &OutboundFrame) -> String {
    // Serializing plain strings and a `Value` into a String cannot fail;
    // serde_json only errors on non-string map keys or failing Serialize impls.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Encode the handshake frame sent immediately after the socket opens.
#[must_use]
pub fn encode_auth(token: &str) -> String {
    serde_json::to_string(&AuthFrame { kind: FrameKind::Auth.as_str(), token }).unwrap_or_default()
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
