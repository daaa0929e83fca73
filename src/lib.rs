//! Real-time notification and conversation sync for the kanban board client.
//!
//! Layering, leaves first:
//!
//! - [`config`], [`session`], [`api`]: environment, persisted credentials, REST.
//! - [`ledger`], [`typing`], [`notify`], [`center`]: per-session notification state.
//! - [`backoff`], [`connection`]: the reconnecting WebSocket manager.
//! - [`outbound`]: push-then-REST sends with idempotency keys.
//! - [`poller`], [`search`]: board chat polling and debounced user search.
//!
//! Wire types live in the `frames` crate.

pub mod api;
pub mod backoff;
pub mod center;
pub mod config;
pub mod connection;
pub mod ledger;
pub mod notify;
pub mod outbound;
pub mod poller;
pub mod search;
pub mod session;
pub mod typing;

pub use api::{ApiClient, ApiError};
pub use center::{MessageOutcome, NotificationCenter};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionStatus, Scope, Subscription};
pub use ledger::UnreadLedger;
pub use outbound::{Delivery, OutboundCommand, Outbox, SendReceipt};
pub use poller::{BoardChatView, BoardPoller};
pub use search::{SearchState, UserSearch};
pub use session::{FileStore, KeyValueStore, Session};
pub use typing::TypingTracker;
