//! REST client for the board backend.
//!
//! Every call goes through one request helper that attaches the bearer
//! token, an optional `Idempotency-Key`, and maps non-2xx responses to
//! [`ApiError::Status`] using the body's `error` field when present.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here retries. Callers decide whether a failure is background
//! noise (polling, snapshot refresh) or must reach the user (sends).

use std::sync::Arc;

use async_trait::async_trait;
use frames::{BoardId, ChatMember, ChatMessage, UserId, UserSummary};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::center::UnreadBackend;
use crate::config::ClientConfig;
use crate::ledger::UnreadSnapshot;
use crate::outbound::{FallbackTransport, OutboundCommand};
use crate::poller::BoardFeed;
use crate::search::UserDirectory;
use crate::session::{Session, User};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("not logged in")]
    MissingToken,
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status for server-side rejections.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Response of the login and register endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

impl AuthResponse {
    #[must_use]
    pub fn into_session(self) -> Session {
        Session::new(self.token, self.user)
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<ChatMember>,
}

#[derive(Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<UserSummary>,
}

/// Shared REST client. Clones share one connection pool.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, base_url: Arc::from(config.api_url("")), token: None })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl AsRef<str>) -> Self {
        self.token = Some(Arc::from(token.as_ref()));
        self
    }

    #[must_use]
    pub fn with_session(self, session: &Session) -> Self {
        self.with_token(&session.token)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    // =========================================================================
    // AUTH
    // =========================================================================

    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] for rejected credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = json!({"email": email, "password": password});
        self.request(Method::POST, "/auth/login", Some(&body), None, false).await
    }

    /// `POST /auth/register`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] when the backend rejects the registration.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = json!({"name": name, "email": email, "password": password});
        self.request(Method::POST, "/auth/register", Some(&body), None, false).await
    }

    /// `GET /auth/profile`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingToken`] without a token, or any transport/status error.
    pub async fn profile(&self) -> Result<User, ApiError> {
        self.request(Method::GET, "/auth/profile", None, None, true).await
    }

    // =========================================================================
    // PRIVATE MESSAGES
    // =========================================================================

    /// `GET /private-messages/unread-counts`.
    ///
    /// # Errors
    ///
    /// Returns any transport, status, or decode error.
    pub async fn unread_counts(&self) -> Result<UnreadSnapshot, ApiError> {
        self.request(Method::GET, "/private-messages/unread-counts", None, None, true).await
    }

    /// `PUT /private-messages/users/{id}/read`.
    ///
    /// # Errors
    ///
    /// Returns any transport or status error.
    pub async fn mark_read(&self, user_id: UserId) -> Result<(), ApiError> {
        let path = format!("/private-messages/users/{user_id}/read");
        let _: Value = self.request(Method::PUT, &path, None, None, true).await?;
        Ok(())
    }

    /// `POST /private-messages/typing`.
    ///
    /// # Errors
    ///
    /// Returns any transport or status error.
    pub async fn send_typing(
        &self,
        recipient_id: UserId,
        is_typing: bool,
        idempotency_key: Option<&str>,
    ) -> Result<(), ApiError> {
        let body = json!({"recipient_id": recipient_id, "is_typing": is_typing});
        let _: Value = self
            .request(Method::POST, "/private-messages/typing", Some(&body), idempotency_key, true)
            .await?;
        Ok(())
    }

    /// `POST /private-messages`. Returns the stored message as sent back by the server.
    ///
    /// # Errors
    ///
    /// Returns any transport or status error.
    pub async fn send_private_message(
        &self,
        recipient_id: UserId,
        content: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = json!({"recipient_id": recipient_id, "content": content});
        self.request(Method::POST, "/private-messages", Some(&body), idempotency_key, true)
            .await
    }

    // =========================================================================
    // BOARD CHAT
    // =========================================================================

    /// `GET /chat/boards/{id}/messages`.
    ///
    /// # Errors
    ///
    /// Returns any transport, status, or decode error.
    pub async fn board_messages(&self, board_id: BoardId) -> Result<Vec<ChatMessage>, ApiError> {
        let path = format!("/chat/boards/{board_id}/messages");
        let body: MessagesResponse = self.request(Method::GET, &path, None, None, true).await?;
        Ok(body.messages)
    }

    /// `GET /chat/boards/{id}/members`.
    ///
    /// # Errors
    ///
    /// Returns any transport, status, or decode error.
    pub async fn board_members(&self, board_id: BoardId) -> Result<Vec<ChatMember>, ApiError> {
        let path = format!("/chat/boards/{board_id}/members");
        let body: MembersResponse = self.request(Method::GET, &path, None, None, true).await?;
        Ok(body.members)
    }

    /// `POST /chat/boards/{id}/messages`.
    ///
    /// # Errors
    ///
    /// Returns any transport or status error.
    pub async fn send_board_message(
        &self,
        board_id: BoardId,
        content: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ApiError> {
        let path = format!("/chat/boards/{board_id}/messages");
        let body = json!({"content": content, "sender": "user", "boardId": board_id});
        self.request(Method::POST, &path, Some(&body), idempotency_key, true).await
    }

    /// `GET /chat/users/search?q=`.
    ///
    /// # Errors
    ///
    /// Returns any transport, status, or decode error.
    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
        let request = self
            .http
            .get(format!("{}/chat/users/search", self.base_url))
            .query(&[("q", query)])
            .header(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        let body: UsersResponse = read_response(request.send().await?).await?;
        Ok(body.users)
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        idempotency_key: Option<&str>,
        authenticated: bool,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);

        if authenticated {
            let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
            request = request.header(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(key)?);
        }
        if let Some(json) = body {
            request = request.json(json);
        }

        read_response(request.send().await?).await
    }
}

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        return Err(ApiError::Status { status: status.as_u16(), message: error_message(status, &bytes) });
    }

    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) { b"null" } else { &bytes };
    Ok(serde_json::from_slice(bytes)?)
}

/// Best human-readable reason for a failed response.
fn error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        for field in ["error", "message"] {
            if let Some(text) = value.get(field).and_then(Value::as_str) {
                return text.to_owned();
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_owned()
    } else {
        text.to_owned()
    }
}

// =============================================================================
// TRAIT SEAMS
// =============================================================================

#[async_trait]
impl UnreadBackend for ApiClient {
    async fn fetch_unread(&self) -> Result<UnreadSnapshot, ApiError> {
        self.unread_counts().await
    }

    async fn mark_read(&self, user_id: UserId) -> Result<(), ApiError> {
        ApiClient::mark_read(self, user_id).await
    }
}

#[async_trait]
impl BoardFeed for ApiClient {
    async fn messages(&self, board_id: BoardId) -> Result<Vec<ChatMessage>, ApiError> {
        self.board_messages(board_id).await
    }

    async fn members(&self, board_id: BoardId) -> Result<Vec<ChatMember>, ApiError> {
        self.board_members(board_id).await
    }
}

#[async_trait]
impl UserDirectory for ApiClient {
    async fn search(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        self.search_users(query).await
    }
}

#[async_trait]
impl FallbackTransport for ApiClient {
    async fn deliver(&self, command: &OutboundCommand, idempotency_key: &str) -> Result<(), ApiError> {
        let key = Some(idempotency_key);
        match command {
            OutboundCommand::PrivateMessage { recipient_id, content } => {
                self.send_private_message(*recipient_id, content, key).await?;
            }
            OutboundCommand::ChatMessage { board_id, content } => {
                self.send_board_message(*board_id, content, key).await?;
            }
            OutboundCommand::Typing { recipient_id, is_typing } => {
                self.send_typing(*recipient_id, *is_typing, key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
