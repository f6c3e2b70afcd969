//! Feed-side types and clients: the timelines we poll and the posts they
//! return.

pub mod client;
pub mod types;

pub use client::TimelineClient;
pub use types::{FeedKind, Post};

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

/// Seam between the sync loop and whatever serves the timelines.
#[async_trait]
pub trait TimelineApi: Send + Sync {
    /// Fetch posts with id strictly greater than `since_id`, up to `limit`,
    /// in API-native order.
    async fn fetch_since(
        &self,
        feed: FeedKind,
        since_id: u64,
        limit: usize,
    ) -> Result<Vec<Post>, FeedError>;
}

#[derive(Debug)]
pub enum FeedError {
    Http(reqwest::Error),
    Timeout,
    Auth(StatusCode),
    RateLimited,
    Api { status: StatusCode, body: String },
    MalformedPost(String),
}

impl FeedError {
    pub(crate) fn http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout
        } else {
            FeedError::Http(err)
        }
    }
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Http(err) => write!(f, "http error: {err}"),
            FeedError::Timeout => write!(f, "request timed out"),
            FeedError::Auth(status) => write!(f, "authentication rejected ({status})"),
            FeedError::RateLimited => write!(f, "rate limited by the feed API"),
            FeedError::Api { status, body } => write!(f, "feed api error {status}: {body}"),
            FeedError::MalformedPost(msg) => write!(f, "malformed post: {msg}"),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeedError::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// In-memory timeline for tests: queued batches per feed, recorded calls.
/// An exhausted queue reads as "no new posts".
#[derive(Default)]
pub struct MockTimeline {
    batches: Mutex<HashMap<FeedKind, VecDeque<Result<Vec<Post>, FeedError>>>>,
    calls: Mutex<Vec<(FeedKind, u64, usize)>>,
}

impl MockTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, feed: FeedKind, batch: Result<Vec<Post>, FeedError>) {
        self.batches
            .lock()
            .unwrap()
            .entry(feed)
            .or_default()
            .push_back(batch);
    }

    pub fn calls(&self) -> Vec<(FeedKind, u64, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimelineApi for MockTimeline {
    async fn fetch_since(
        &self,
        feed: FeedKind,
        since_id: u64,
        limit: usize,
    ) -> Result<Vec<Post>, FeedError> {
        self.calls.lock().unwrap().push((feed, since_id, limit));
        self.batches
            .lock()
            .unwrap()
            .get_mut(&feed)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
