//! WebSocket connection manager.
//!
//! DESIGN
//! ======
//! One `ConnectionManager` owns one socket for one [`Scope`] (a board, or the
//! viewer's private inbox). A spawned task runs the state machine
//!
//! ```text
//! Disconnected -> Connecting -> Authenticated -> Backoff{attempt, delay} -> Connecting ...
//! ```
//!
//! and publishes every transition on a `watch` channel. The `auth` frame is
//! written as soon as the handshake completes; no ack is awaited. The
//! backoff schedule resets after each successful auth.
//!
//! Outbound frames go through an unbounded channel whose sender is present
//! only while the socket is authenticated, so [`ConnectionManager::send`]
//! returns `false` (never errors) whenever nothing can be written. A frame
//! pushed through [`PushTransport`] also carries a oneshot that fires only
//! once the socket write succeeded; frames still queued when the socket dies
//! drop their oneshot, which the outbox reads as "not sent".
//!
//! ERROR HANDLING
//! ==============
//! Transport failures are logged and move the machine to `Backoff`.
//! Malformed or unknown frames are logged and dropped by [`Dispatcher`];
//! they never tear the connection down.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::{BoardId, FrameKind, InboundFrame, OutboundFrame, Payload};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::center::NotificationCenter;
use crate::config::{ClientConfig, ConfigError};
use crate::outbound::PushTransport;

/// How long a push waits for its frame to reach the socket before the
/// outbox gives up on it and uses REST.
pub const PUSH_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("no board id and private_message not requested; nothing to connect to")]
    NoScope,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    #[error("websocket failed: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}

// =============================================================================
// SCOPE / STATUS
// =============================================================================

/// What a connection is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Board(BoardId),
    Private,
}

impl Scope {
    /// A board id always wins; without one, only a consumer asking for
    /// `private_message` frames gets the private inbox.
    #[must_use]
    pub fn resolve(board_id: Option<BoardId>, kinds: &[FrameKind]) -> Option<Self> {
        match board_id {
            Some(id) => Some(Self::Board(id)),
            None if kinds.contains(&FrameKind::PrivateMessage) => Some(Self::Private),
            None => None,
        }
    }

    /// Path under `/api`.
    #[must_use]
    pub fn path(self) -> String {
        match self {
            Self::Board(id) => format!("/ws/{id}"),
            Self::Private => "/ws/private".to_owned(),
        }
    }

    #[must_use]
    pub fn board_id(self) -> Option<BoardId> {
        match self {
            Self::Board(id) => Some(id),
            Self::Private => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Board(id) => write!(f, "board:{id}"),
            Self::Private => f.write_str("private"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Authenticated,
    Backoff { attempt: u32, delay: Duration },
}

impl ConnectionStatus {
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Backoff { attempt, delay } => write!(f, "backoff (attempt {attempt}, {}ms)", delay.as_millis()),
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

pub type FrameCallback = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

/// Frame kinds a consumer wants plus its optional callback.
#[derive(Clone, Default)]
pub struct Subscription {
    pub board_id: Option<BoardId>,
    /// Empty means every kind.
    pub kinds: Vec<FrameKind>,
    pub on_frame: Option<FrameCallback>,
}

impl Subscription {
    #[must_use]
    pub fn board(board_id: BoardId) -> Self {
        Self { board_id: Some(board_id), ..Self::default() }
    }

    #[must_use]
    pub fn private_inbox() -> Self {
        Self { kinds: vec![FrameKind::PrivateMessage, FrameKind::Typing], ..Self::default() }
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = FrameKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    #[must_use]
    pub fn on_frame(mut self, callback: impl Fn(&InboundFrame) + Send + Sync + 'static) -> Self {
        self.on_frame = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("board_id", &self.board_id)
            .field("kinds", &self.kinds)
            .field("on_frame", &self.on_frame.is_some())
            .finish()
    }
}

/// Routes decoded frames to the notification center and the consumer callback.
#[derive(Clone)]
pub struct Dispatcher {
    center: NotificationCenter,
    kinds: Vec<FrameKind>,
    on_frame: Option<FrameCallback>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(center: NotificationCenter, kinds: Vec<FrameKind>, on_frame: Option<FrameCallback>) -> Self {
        Self { center, kinds, on_frame }
    }

    fn wants(&self, kind: FrameKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    /// Decode and route one raw frame. Returns the frame when it decoded.
    pub fn dispatch(&self, bytes: &[u8]) -> Option<InboundFrame> {
        let frame = match frames::decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ws: dropping frame");
                return None;
            }
        };

        match &frame.payload {
            // Only consumers that asked for private messages count them, so a
            // board socket and the inbox socket never double-count.
            Payload::PrivateMessage(msg) if self.kinds.contains(&FrameKind::PrivateMessage) => {
                let outcome = self.center.handle_private_message(frame.recipient_id, msg);
                debug!(sender_id = msg.sender_id, ?outcome, "ws: private message");
            }
            Payload::Typing(notice) => {
                self.center.handle_typing(frame.recipient_id, notice);
            }
            _ => {}
        }

        if self.wants(frame.kind()) {
            if let Some(callback) = &self.on_frame {
                callback(&frame);
            }
        }
        Some(frame)
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// One queued text frame; `written` fires after the socket write succeeds.
struct Outgoing {
    text: String,
    written: Option<oneshot::Sender<()>>,
}

type Link = Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>>;

/// Cloneable push handle for one connection.
#[derive(Clone, Debug)]
pub struct ConnectionSender {
    scope: Scope,
    link: Link,
}

impl ConnectionSender {
    /// Queue `{type, data, boardId?}` on the open socket.
    /// Returns `false` when the socket is not authenticated.
    #[must_use]
    pub fn send(&self, kind: FrameKind, data: Value) -> bool {
        self.send_frame(&OutboundFrame::new(kind.as_str(), data).with_board_id(self.scope.board_id()))
    }

    #[must_use]
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        self.enqueue(frame, None)
    }

    /// Queue `frame` and wait until it has been written to the socket.
    /// Returns `false` when the socket is closed, dies before the write, or
    /// the write takes longer than `timeout`.
    pub async fn send_frame_confirmed(&self, frame: &OutboundFrame, timeout: Duration) -> bool {
        let (written_tx, written_rx) = oneshot::channel();
        if !self.enqueue(frame, Some(written_tx)) {
            return false;
        }
        match tokio::time::timeout(timeout, written_rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!(scope = %self.scope, "ws: socket dropped queued frame");
                false
            }
            Err(_) => {
                warn!(scope = %self.scope, timeout_ms = timeout.as_millis(), "ws: frame write timed out");
                false
            }
        }
    }

    fn enqueue(&self, frame: &OutboundFrame, written: Option<oneshot::Sender<()>>) -> bool {
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let outgoing = Outgoing { text: frames::encode_frame(frame), written };
        link.as_ref().is_some_and(|tx| tx.send(outgoing).is_ok())
    }
}

#[async_trait]
impl PushTransport for ConnectionSender {
    async fn push(&self, frame: &OutboundFrame) -> bool {
        self.send_frame_confirmed(frame, PUSH_WRITE_TIMEOUT).await
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    scope: Scope,
    sender: ConnectionSender,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

struct LoopContext {
    scope: Scope,
    url: String,
    token: String,
    backoff: Backoff,
    dispatcher: Dispatcher,
    link: Link,
    status: watch::Sender<ConnectionStatus>,
}

enum Exit {
    Shutdown,
    Closed,
}

impl ConnectionManager {
    /// Resolve the scope and spawn the connection task. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NoScope`] when the subscription names neither a
    /// board nor private messages, or [`ConnectionError::Config`] for a base
    /// URL that cannot become a WebSocket URL.
    pub fn connect(
        config: &ClientConfig,
        token: &str,
        subscription: Subscription,
        center: NotificationCenter,
    ) -> Result<Self, ConnectionError> {
        let scope = Scope::resolve(subscription.board_id, &subscription.kinds).ok_or(ConnectionError::NoScope)?;
        let url = config.ws_url(&scope.path())?;

        let link = Link::default();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = LoopContext {
            scope,
            url,
            token: token.to_owned(),
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            dispatcher: Dispatcher::new(center, subscription.kinds, subscription.on_frame),
            link: link.clone(),
            status: status_tx,
        };
        let task = tokio::spawn(run(ctx, shutdown_rx));

        Ok(Self {
            scope,
            sender: ConnectionSender { scope, link },
            status: status_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver for status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn sender(&self) -> ConnectionSender {
        self.sender.clone()
    }

    /// See [`ConnectionSender::send`].
    #[must_use]
    pub fn send(&self, kind: FrameKind, data: Value) -> bool {
        self.sender.send(kind, data)
    }

    /// Close the socket and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, scope = %self.scope, "ws: connection task failed");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run(mut ctx: LoopContext, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        ctx.status.send_replace(ConnectionStatus::Connecting);
        debug!(scope = %ctx.scope, url = %ctx.url, "ws: connecting");

        let result = connect_and_run(&mut ctx, &mut shutdown).await;
        ctx.link.lock().unwrap_or_else(PoisonError::into_inner).take();

        match result {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Closed) => info!(scope = %ctx.scope, "ws: closed by server"),
            Err(e) => warn!(scope = %ctx.scope, error = %e, "ws: connection failed"),
        }

        let delay = ctx.backoff.next_delay();
        let attempt = ctx.backoff.attempt();
        ctx.status.send_replace(ConnectionStatus::Backoff { attempt, delay });
        debug!(scope = %ctx.scope, attempt, delay_ms = delay.as_millis(), "ws: backing off");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    ctx.status.send_replace(ConnectionStatus::Disconnected);
    info!(scope = %ctx.scope, "ws: stopped");
}

async fn connect_and_run(ctx: &mut LoopContext, shutdown: &mut watch::Receiver<bool>) -> Result<Exit, ConnectionError> {
    let mut request = ctx.url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", ctx.token))?);

    let stream = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => result?.0,
        _ = shutdown.changed() => return Ok(Exit::Shutdown),
    };
    let (mut write, mut read) = stream.split();

    write.send(Message::Text(frames::encode_auth(&ctx.token).into())).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    *ctx.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    ctx.status.send_replace(ConnectionStatus::Authenticated);
    ctx.backoff.reset();
    info!(scope = %ctx.scope, "ws: authenticated");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    while let Ok(outgoing) = rx.try_recv() {
                        write_outgoing(&mut write, outgoing).await?;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                }
            }
            Some(outgoing) = rx.recv() => {
                write_outgoing(&mut write, outgoing).await?;
            }
            message = read.next() => match message {
                None | Some(Ok(Message::Close(_))) => return Ok(Exit::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => {
                    ctx.dispatcher.dispatch(text.as_bytes());
                }
                Some(Ok(Message::Binary(bytes))) => {
                    ctx.dispatcher.dispatch(&bytes);
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn write_outgoing<S>(write: &mut S, outgoing: Outgoing) -> Result<(), ConnectionError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    write.send(Message::Text(outgoing.text.into())).await?;
    if let Some(written) = outgoing.written {
        let _ = written.send(());
    }
    Ok(())
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
