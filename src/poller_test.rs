use super::*;
use std::sync::Mutex;

use frames::ChatSender;

fn message(id: u64) -> ChatMessage {
    ChatMessage {
        id,
        board_id: Some(4),
        user_id: Some(1),
        content: format!("m{id}"),
        sender: ChatSender::User,
        created_at: None,
        user: None,
    }
}

fn member(user_id: u64) -> ChatMember {
    ChatMember {
        user_id,
        name: format!("u{user_id}"),
        email: String::new(),
        avatar: None,
        role: "member".into(),
        joined_at: None,
        is_online: false,
    }
}

/// Feed that answers call `n` with script entry `n`, repeating the last one.
struct ScriptedFeed {
    messages: Vec<Result<Vec<u64>, u16>>,
    members: Vec<u64>,
    message_calls: Mutex<usize>,
}

impl ScriptedFeed {
    fn new(messages: Vec<Result<Vec<u64>, u16>>) -> Arc<Self> {
        Arc::new(Self { messages, members: vec![1, 2], message_calls: Mutex::new(0) })
    }

    fn calls(&self) -> usize {
        *self.message_calls.lock().expect("lock")
    }
}

#[async_trait]
impl BoardFeed for ScriptedFeed {
    async fn messages(&self, board_id: BoardId) -> Result<Vec<ChatMessage>, ApiError> {
        assert_eq!(board_id, 4);
        let mut calls = self.message_calls.lock().expect("lock");
        let step = &self.messages[(*calls).min(self.messages.len() - 1)];
        *calls += 1;
        match step {
            Ok(ids) => Ok(ids.iter().copied().map(message).collect()),
            Err(status) => Err(ApiError::Status { status: *status, message: "unavailable".into() }),
        }
    }

    async fn members(&self, _board_id: BoardId) -> Result<Vec<ChatMember>, ApiError> {
        Ok(self.members.iter().copied().map(member).collect())
    }
}

fn ids(view: &BoardChatView) -> Vec<u64> {
    view.messages.iter().map(|m| m.id).collect()
}

async fn wait_ticks(rx: &mut watch::Receiver<BoardChatView>, ticks: u64) -> BoardChatView {
    rx.wait_for(|v| v.ticks >= ticks).await.expect("poller alive").clone()
}

#[tokio::test(start_paused = true)]
async fn second_tick_replaces_list_instead_of_appending() {
    let feed = ScriptedFeed::new(vec![Ok(vec![1, 2]), Ok(vec![1, 2, 3])]);
    let start = tokio::time::Instant::now();
    let poller = BoardPoller::spawn(feed.clone(), 4, Duration::from_secs(5));
    let mut rx = poller.subscribe();

    let first = wait_ticks(&mut rx, 1).await;
    assert_eq!(ids(&first), vec![1, 2]);
    assert_eq!(first.members.len(), 2);
    assert!(start.elapsed() < Duration::from_secs(1));

    let second = wait_ticks(&mut rx, 2).await;
    assert_eq!(ids(&second), vec![1, 2, 3]);
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_previous_list_and_polling_continues() {
    let feed = ScriptedFeed::new(vec![Ok(vec![1]), Err(502), Ok(vec![1, 2])]);
    let poller = BoardPoller::spawn(feed.clone(), 4, Duration::from_secs(5));
    let mut rx = poller.subscribe();

    assert_eq!(ids(&wait_ticks(&mut rx, 1).await), vec![1]);

    let failed = wait_ticks(&mut rx, 2).await;
    assert_eq!(ids(&failed), vec![1]);
    assert_eq!(failed.members.len(), 2);

    assert_eq!(ids(&wait_ticks(&mut rx, 3).await), vec![1, 2]);
    assert_eq!(feed.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn dropping_poller_stops_fetching() {
    let feed = ScriptedFeed::new(vec![Ok(vec![1])]);
    let poller = BoardPoller::spawn(feed.clone(), 4, Duration::from_secs(5));
    let mut rx = poller.subscribe();
    wait_ticks(&mut rx, 2).await;
    assert_eq!(poller.board_id(), 4);
    let calls = feed.calls();

    poller.stop();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(feed.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_raised_to_minimum() {
    let feed = ScriptedFeed::new(vec![Ok(vec![1])]);
    let start = tokio::time::Instant::now();
    let poller = BoardPoller::spawn(feed.clone(), 4, Duration::ZERO);
    let mut rx = poller.subscribe();

    wait_ticks(&mut rx, 3).await;

    assert_eq!(feed.calls(), 3);
    assert!(start.elapsed() >= MIN_POLL_INTERVAL * 2);
}
