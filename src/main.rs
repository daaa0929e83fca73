use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use frames::{BoardId, InboundFrame, Payload, UserId};
use kanban_sync::api::{ApiClient, ApiError};
use kanban_sync::center::NotificationCenter;
use kanban_sync::config::ClientConfig;
use kanban_sync::connection::{ConnectionError, ConnectionManager, ConnectionStatus, Subscription};
use kanban_sync::notify::LogNotifier;
use kanban_sync::outbound::{OutboundCommand, Outbox, SendError, SendReceipt};
use kanban_sync::poller::BoardPoller;
use kanban_sync::search::{MIN_QUERY_CHARS, SearchState, UserSearch};
use kanban_sync::session::{FileStore, Session, StorageError, clear_auth_data, migrate_legacy_keys};
use tracing::{info, warn};

/// How long `send` / `chat` wait for a socket before going straight to REST.
const PUSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in; run `kanban-sync login` first")]
    NotLoggedIn,
    #[error("search query must be at least {MIN_QUERY_CHARS} characters")]
    QueryTooShort,
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "kanban-sync", about = "Kanban board realtime sync client")]
struct Cli {
    #[arg(long, env = "KANBAN_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "KANBAN_STORAGE_PATH")]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rename legacy session keys and drop orphaned entries.
    Migrate,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "KANBAN_PASSWORD")]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "KANBAN_PASSWORD")]
        password: String,
    },
    Logout,
    Whoami,
    /// Print unread private-message counts.
    Unread,
    /// Open a conversation and mark it read.
    Read {
        user_id: UserId,
    },
    /// Stream live frames for a board, or the private inbox without `--board-id`.
    Watch {
        #[arg(long)]
        board_id: Option<BoardId>,
        /// Allow desktop notifications for new private messages.
        #[arg(long)]
        notify: bool,
    },
    /// Poll a board's chat messages and members.
    Poll {
        #[arg(long)]
        board_id: BoardId,
    },
    /// Send a private message.
    Send {
        #[arg(long)]
        to: UserId,
        text: String,
    },
    /// Post to a board's chat.
    Chat {
        #[arg(long)]
        board_id: BoardId,
        text: String,
    },
    /// Search users by name or email.
    Search {
        query: String,
    },
}

struct CliContext {
    config: ClientConfig,
    store: FileStore,
    api: ApiClient,
}

impl CliContext {
    fn session(&self) -> Result<Session, CliError> {
        Session::load(&self.store)?.ok_or(CliError::NotLoggedIn)
    }

    fn authed_api(&self, session: &Session) -> ApiClient {
        self.api.clone().with_session(session)
    }

    fn center(&self, session: &Session) -> NotificationCenter {
        NotificationCenter::new(session.user_id(), self.config.typing_ttl, Arc::new(LogNotifier::default()))
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(storage) = cli.storage {
        config.storage_path = storage;
    }

    let store = FileStore::open(&config.storage_path)?;
    let report = migrate_legacy_keys(&store)?;
    let api = ApiClient::new(&config)?;
    let ctx = CliContext { config, store, api };

    match cli.command {
        Command::Migrate => {
            println!("{report:?}");
            Ok(())
        }
        Command::Login { email, password } => {
            let auth = ctx.api.login(&email, &password).await?;
            store_session(&ctx, auth.into_session())
        }
        Command::Register { name, email, password } => {
            let auth = ctx.api.register(&name, &email, &password).await?;
            store_session(&ctx, auth.into_session())
        }
        Command::Logout => {
            clear_auth_data(&ctx.store)?;
            println!("logged out");
            Ok(())
        }
        Command::Whoami => run_whoami(&ctx).await,
        Command::Unread => run_unread(&ctx).await,
        Command::Read { user_id } => run_read(&ctx, user_id).await,
        Command::Watch { board_id, notify } => run_watch(&ctx, board_id, notify).await,
        Command::Poll { board_id } => run_poll(&ctx, board_id).await,
        Command::Send { to, text } => {
            let command = OutboundCommand::PrivateMessage { recipient_id: to, content: text };
            run_send(&ctx, Subscription::private_inbox(), command).await
        }
        Command::Chat { board_id, text } => {
            let command = OutboundCommand::ChatMessage { board_id, content: text };
            run_send(&ctx, Subscription::board(board_id), command).await
        }
        Command::Search { query } => run_search(&ctx, &query).await,
    }
}

fn store_session(ctx: &CliContext, session: Session) -> Result<(), CliError> {
    session.persist(&ctx.store)?;
    println!("logged in as {} ({})", session.user.name, session.user.id);
    Ok(())
}

async fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    let session = ctx.session()?;
    let user = ctx.authed_api(&session).profile().await?;
    println!("{} <{}> id={}", user.name, user.email, user.id);
    Ok(())
}

async fn run_unread(ctx: &CliContext) -> Result<(), CliError> {
    let session = ctx.session()?;
    let center = ctx.center(&session);
    let total = center.sync_snapshot(&ctx.authed_api(&session)).await?;

    println!("total unread: {total}");
    for (user_id, count) in center.ledger().conversations() {
        println!("  user {user_id}: {count}");
    }
    Ok(())
}

async fn run_read(ctx: &CliContext, user_id: UserId) -> Result<(), CliError> {
    let session = ctx.session()?;
    let api = ctx.authed_api(&session);
    let center = ctx.center(&session);
    center.sync_snapshot(&api).await?;

    let cleared = center.open_conversation(user_id, &api).await?;
    println!("marked {cleared} message(s) from user {user_id} as read; {} unread left", center.ledger().total());
    Ok(())
}

async fn run_watch(ctx: &CliContext, board_id: Option<BoardId>, notify: bool) -> Result<(), CliError> {
    let session = ctx.session()?;
    let api = ctx.authed_api(&session);
    let center = ctx.center(&session);
    if notify {
        center.request_permission();
    }
    if let Err(e) = center.sync_snapshot(&api).await {
        warn!(error = %e, "ledger: initial snapshot failed");
    }

    let subscription = match board_id {
        Some(id) => Subscription::board(id),
        None => Subscription::private_inbox(),
    };
    let manager = ConnectionManager::connect(&ctx.config, &session.token, subscription.on_frame(print_frame), center.clone())?;

    let mut status = manager.subscribe_status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(status = %current, "ws: status");
        }
    });

    tokio::signal::ctrl_c().await?;
    manager.shutdown().await;
    status_task.abort();

    println!("unread total: {}", center.ledger().total());
    Ok(())
}

fn print_frame(frame: &InboundFrame) {
    match &frame.payload {
        Payload::PrivateMessage(msg) => println!("[private] {}: {}", msg.sender_id, msg.content),
        Payload::ChatMessage(msg) => println!("[chat {}] {}", msg.id, msg.content),
        Payload::Typing(notice) => println!("[typing] {} typing={}", notice.sender_id, notice.is_typing),
        Payload::Board(_, data) => println!("[{}] {data}", frame.kind()),
        Payload::Auth => {}
    }
}

async fn run_poll(ctx: &CliContext, board_id: BoardId) -> Result<(), CliError> {
    let session = ctx.session()?;
    let poller = BoardPoller::spawn(Arc::new(ctx.authed_api(&session)), board_id, ctx.config.poll_interval);
    let mut view = poller.subscribe();
    let mut last_id = None;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                for msg in current.messages.iter().filter(|m| last_id.is_none_or(|last| m.id > last)) {
                    println!("[{}] {}", msg.id, msg.content);
                }
                last_id = current.messages.iter().map(|m| m.id).max().or(last_id);
                info!(%board_id, tick = current.ticks, members = current.members.len(), "poll: updated");
            }
        }
    }

    poller.stop();
    Ok(())
}

async fn run_send(ctx: &CliContext, subscription: Subscription, command: OutboundCommand) -> Result<(), CliError> {
    let session = ctx.session()?;
    let api = Arc::new(ctx.authed_api(&session));

    let manager = ConnectionManager::connect(&ctx.config, &session.token, subscription, ctx.center(&session))?;
    let mut status = manager.subscribe_status();
    let connected = tokio::time::timeout(PUSH_CONNECT_TIMEOUT, status.wait_for(|s| *s == ConnectionStatus::Authenticated))
        .await
        .is_ok_and(|r| r.is_ok());
    if !connected {
        info!(scope = %manager.scope(), "ws: not connected in time; sending over rest");
    }

    let outbox = Outbox::new(Arc::new(manager.sender()), api);
    let result = outbox.send(&command).await;
    manager.shutdown().await;

    let SendReceipt { idempotency_key, delivery } = result?;
    println!("sent {} via {delivery:?} (key {idempotency_key})", command.kind());
    Ok(())
}

async fn run_search(ctx: &CliContext, query: &str) -> Result<(), CliError> {
    if query.trim().chars().count() < MIN_QUERY_CHARS {
        return Err(CliError::QueryTooShort);
    }
    let session = ctx.session()?;
    let search = UserSearch::new(Arc::new(ctx.authed_api(&session)), ctx.config.search_debounce);
    let mut state = search.subscribe();

    search.set_query(query);
    let done = state
        .wait_for(|s| matches!(s, SearchState::Ready { .. } | SearchState::Failed { .. }))
        .await
        .map(|s| s.clone());

    match done {
        Ok(SearchState::Ready { users, .. }) => {
            for user in users {
                println!("{}\t{}\t{}", user.id, user.name, user.email);
            }
        }
        Ok(SearchState::Failed { message, .. }) => warn!(%message, "search: failed"),
        Ok(_) | Err(_) => {}
    }
    Ok(())
}
