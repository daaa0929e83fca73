//! Debounced user search.
//!
//! Each [`UserSearch::set_query`] aborts whatever the previous query was
//! doing (waiting out the debounce or already in flight) and bumps a
//! generation counter. A task publishes only while its generation is still
//! current, so a superseded search that already finished on another worker
//! cannot overwrite newer state. Queries shorter than
//! [`MIN_QUERY_CHARS`] after trimming clear the results without a request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use frames::UserSummary;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ApiError;

pub const MIN_QUERY_CHARS: usize = 2;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<UserSummary>, ApiError>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum SearchState {
    #[default]
    Idle,
    Pending {
        query: String,
    },
    Ready {
        query: String,
        users: Vec<UserSummary>,
    },
    Failed {
        query: String,
        message: String,
    },
}

pub struct UserSearch {
    directory: Arc<dyn UserDirectory>,
    debounce: Duration,
    state: Arc<watch::Sender<SearchState>>,
    generation: Arc<AtomicU64>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl UserSearch {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(SearchState::Idle);
        Self {
            directory,
            debounce,
            state: Arc::new(state),
            generation: Arc::default(),
            in_flight: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    /// Replace the current query. Must be called inside a tokio runtime.
    pub fn set_query(&self, query: &str) {
        let query = query.trim().to_owned();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = in_flight.take() {
            previous.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if query.chars().count() < MIN_QUERY_CHARS {
            self.state.send_replace(SearchState::Idle);
            return;
        }

        self.state.send_replace(SearchState::Pending { query: query.clone() });
        let directory = self.directory.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        let debounce = self.debounce;
        *in_flight = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            debug!(%query, "search: issuing");
            let next = match directory.search(&query).await {
                Ok(users) => SearchState::Ready { query, users },
                Err(e) => {
                    warn!(%query, error = %e, "search: failed");
                    SearchState::Failed { query, message: e.to_string() }
                }
            };
            publish_if_current(&state, &current, generation, next);
        }));
    }

    /// Abandon the current query and clear results.
    pub fn cancel(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = in_flight.take() {
            previous.abort();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(SearchState::Idle);
    }
}

/// Publish `next` unless a newer query has started since `generation`.
/// The check runs under the watch lock, so it cannot interleave with the
/// newer query's own publish.
fn publish_if_current(state: &watch::Sender<SearchState>, current: &AtomicU64, generation: u64, next: SearchState) -> bool {
    state.send_if_modified(|slot| {
        if current.load(Ordering::SeqCst) != generation {
            debug!(generation, "search: dropping superseded result");
            return false;
        }
        *slot = next;
        true
    })
}

impl Drop for UserSearch {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "search_test.rs"]
mod tests;
