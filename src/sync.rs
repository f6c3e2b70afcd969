//! Cursor state and the polling loop.
//!
//! One logical worker: rounds for different feeds run sequentially, so the
//! cursor map has a single owner and needs no locking. Durable truth lives in
//! the store; the in-memory watermarks are rebuilt from it at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::feed::{FeedKind, TimelineApi};
use crate::retry::Backoff;
use crate::store::{PostStore, StoreError};

pub struct SyncLoop {
    api: Arc<dyn TimelineApi>,
    store: Arc<dyn PostStore>,
    feeds: Vec<FeedKind>,
    cursors: HashMap<FeedKind, u64>,
    round_wait: Duration,
    fetch_max: usize,
    backoff: Backoff,
    shutdown: CancellationToken,
}

impl SyncLoop {
    pub fn new(
        api: Arc<dyn TimelineApi>,
        store: Arc<dyn PostStore>,
        feeds: Vec<FeedKind>,
        round_wait: Duration,
        fetch_max: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            store,
            feeds,
            cursors: HashMap::new(),
            round_wait,
            fetch_max,
            backoff: Backoff::default(),
            shutdown,
        }
    }

    /// Provision every feed's index, then rebuild the cursors from the store.
    /// An empty index starts its feed from 0; any other store failure is
    /// fatal here.
    pub async fn init(&mut self) -> Result<()> {
        for feed in &self.feeds {
            self.store.ensure_index(feed.index()).await?;
            self.store.configure_index(feed.index()).await?;
        }
        for feed in self.feeds.clone() {
            let id = match self.store.last_known_id(feed.index()).await {
                Err(StoreError::EmptyIndex) => {
                    info!(feed = feed.label(), "index is empty, starting from 0");
                    0
                }
                other => other?,
            };
            self.cursors.insert(feed, id);
        }
        Ok(())
    }

    pub fn cursor(&self, feed: FeedKind) -> u64 {
        self.cursors.get(&feed).copied().unwrap_or(0)
    }

    /// One fetch-and-upload pass for a single feed. The cursor advances per
    /// item before its upload, so an aborted round keeps the ground already
    /// covered and the next round resumes past it.
    async fn run_round(&mut self, feed: FeedKind) -> Result<usize> {
        let since_id = self.cursor(feed);
        let posts = self.api.fetch_since(feed, since_id, self.fetch_max).await?;
        let mut uploaded = 0;
        for post in &posts {
            let entry = self.cursors.entry(feed).or_insert(0);
            *entry = (*entry).max(post.id);
            self.backoff
                .run(|| self.store.upsert(feed.index(), post))
                .await?;
            uploaded += 1;
        }
        Ok(uploaded)
    }

    /// One round per feed. A failing feed is logged and skipped; it never
    /// blocks the other feeds or the loop.
    pub async fn run_cycle(&mut self) {
        for feed in self.feeds.clone() {
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.run_round(feed).await {
                Ok(uploaded) => info!(
                    feed = feed.label(),
                    uploaded,
                    cursor = self.cursor(feed),
                    "round complete"
                ),
                Err(err) => error!(feed = feed.label(), "round failed: {err:#}"),
            }
        }
    }

    /// Drive cycles until the shutdown token fires, pausing `round_wait`
    /// between them.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.run_cycle().await;
            info!("cycle complete, waiting {:?}", self.round_wait);
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.round_wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedError, MockTimeline, Post};
    use crate::store::MockStore;
    use serde_json::json;

    fn post(id: u64) -> Post {
        Post::from_value(json!({
            "id": id,
            "created_at": "Mon Jan 02 15:04:05 +0000 2006",
            "full_text": format!("post {id}"),
            "user": { "screen_name": "tester" },
        }))
        .unwrap()
    }

    fn doc_ids(store: &MockStore, index: &str) -> Vec<u64> {
        store.documents(index).into_iter().map(|(id, _)| id).collect()
    }

    fn sync_loop(api: Arc<MockTimeline>, store: Arc<MockStore>) -> SyncLoop {
        let mut sync = SyncLoop::new(
            api,
            store,
            FeedKind::all().to_vec(),
            Duration::from_secs(0),
            500,
            CancellationToken::new(),
        );
        // keep retry waits out of test runtime
        sync.backoff = Backoff {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            factor: 2,
        };
        sync
    }

    #[tokio::test]
    async fn init_provisions_indices_and_recovers_cursors() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        store.push_cursor("timeline", Ok(41));
        // mentions has no queued result: empty index, cursor defaults to 0

        let mut sync = sync_loop(api, store.clone());
        sync.init().await.unwrap();

        assert_eq!(sync.cursor(FeedKind::Home), 41);
        assert_eq!(sync.cursor(FeedKind::Mentions), 0);
        assert_eq!(store.provisioned(), vec!["timeline", "mentions"]);
        assert_eq!(store.configured(), vec!["timeline", "mentions"]);
    }

    #[tokio::test]
    async fn cycle_uploads_new_posts_and_advances_cursor() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        store.push_cursor("timeline", Ok(100));
        api.push_batch(FeedKind::Home, Ok(vec![post(101), post(102), post(103)]));

        let mut sync = sync_loop(api.clone(), store.clone());
        sync.init().await.unwrap();
        sync.run_cycle().await;

        assert_eq!(sync.cursor(FeedKind::Home), 103);
        assert_eq!(doc_ids(&store, "timeline"), vec![101, 102, 103]);
        // both feeds were asked, each from its own cursor
        assert_eq!(
            api.calls(),
            vec![(FeedKind::Home, 100, 500), (FeedKind::Mentions, 0, 500)]
        );
    }

    #[tokio::test]
    async fn empty_fetch_leaves_cursor_untouched() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        store.push_cursor("timeline", Ok(100));

        let mut sync = sync_loop(api, store.clone());
        sync.init().await.unwrap();
        sync.run_cycle().await;

        assert_eq!(sync.cursor(FeedKind::Home), 100);
        assert!(doc_ids(&store, "timeline").is_empty());
    }

    #[tokio::test]
    async fn feed_failure_never_blocks_the_other_feed() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        api.push_batch(FeedKind::Home, Err(FeedError::RateLimited));
        api.push_batch(FeedKind::Mentions, Ok(vec![post(7)]));

        let mut sync = sync_loop(api, store.clone());
        sync.init().await.unwrap();
        sync.run_cycle().await;

        assert_eq!(sync.cursor(FeedKind::Home), 0);
        assert_eq!(sync.cursor(FeedKind::Mentions), 7);
        assert_eq!(doc_ids(&store, "mentions"), vec![7]);
    }

    #[tokio::test]
    async fn upload_failure_aborts_round_but_keeps_cursor() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        api.push_batch(FeedKind::Home, Ok(vec![post(101), post(102), post(103)]));
        store.fail_uploads_for(102);

        let mut sync = sync_loop(api, store.clone());
        sync.init().await.unwrap();
        sync.run_cycle().await;

        // the failed item's id was already folded into the watermark
        assert_eq!(sync.cursor(FeedKind::Home), 102);
        assert_eq!(doc_ids(&store, "timeline"), vec![101]);
        // the upload was retried to exhaustion, then the round stopped
        assert_eq!(store.upsert_attempts(102), 3);
        assert_eq!(store.upsert_attempts(103), 0);
    }

    #[tokio::test]
    async fn cursor_is_max_of_batch_even_out_of_order() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        api.push_batch(FeedKind::Home, Ok(vec![post(105), post(103), post(104)]));

        let mut sync = sync_loop(api, store.clone());
        sync.init().await.unwrap();
        sync.run_cycle().await;

        assert_eq!(sync.cursor(FeedKind::Home), 105);
        assert_eq!(doc_ids(&store, "timeline"), vec![103, 104, 105]);
    }

    #[tokio::test]
    async fn reupload_of_same_id_overwrites_in_place() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        api.push_batch(FeedKind::Home, Ok(vec![post(101)]));
        api.push_batch(FeedKind::Home, Ok(vec![post(101)]));

        let mut sync = sync_loop(api.clone(), store.clone());
        sync.init().await.unwrap();
        sync.run_cycle().await;
        sync.run_cycle().await;

        assert_eq!(doc_ids(&store, "timeline"), vec![101]);
        assert_eq!(sync.cursor(FeedKind::Home), 101);
        // second cycle resumed from the advanced cursor
        assert_eq!(api.calls()[2], (FeedKind::Home, 101, 500));
    }

    #[tokio::test]
    async fn cancelled_loop_returns_promptly() {
        let api = Arc::new(MockTimeline::new());
        let store = Arc::new(MockStore::new());
        let shutdown = CancellationToken::new();
        let mut sync = SyncLoop::new(
            api,
            store,
            FeedKind::all().to_vec(),
            Duration::from_secs(3600),
            500,
            shutdown.clone(),
        );
        sync.init().await.unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), sync.run())
            .await
            .expect("loop should exit on cancellation")
            .unwrap();
    }
}
