use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;

use super::{FeedError, FeedKind, Post, TimelineApi};
use crate::config::FeedConfig;

// The API serves at most this many posts per page; bigger asks are clamped
// server-side anyway.
const PAGE_SIZE: usize = 200;

fn timeline_path(feed: FeedKind) -> &'static str {
    match feed {
        FeedKind::Home => "statuses/home_timeline.json",
        FeedKind::Mentions => "statuses/mentions_timeline.json",
    }
}

// Pages walk backwards in id space: the next page ends just below the oldest
// id already seen.
fn next_max_id(page: &[Post]) -> Option<u64> {
    page.iter()
        .map(|post| post.id)
        .min()
        .map(|oldest| oldest.saturating_sub(1))
}

/// HTTP client for the timeline API.
pub struct TimelineClient {
    http: HttpClient,
    cfg: FeedConfig,
}

impl TimelineClient {
    pub fn new(cfg: FeedConfig) -> Result<Self, FeedError> {
        let http = HttpClient::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(FeedError::http)?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self, feed: FeedKind) -> String {
        format!(
            "{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            timeline_path(feed)
        )
    }

    async fn fetch_page(
        &self,
        feed: FeedKind,
        since_id: u64,
        max_id: Option<u64>,
        count: usize,
    ) -> Result<Vec<Post>, FeedError> {
        let mut req = self
            .http
            .get(self.endpoint(feed))
            .bearer_auth(&self.cfg.token)
            .query(&[
                ("count", count.to_string()),
                ("tweet_mode", "extended".to_string()),
            ]);
        if since_id > 0 {
            req = req.query(&[("since_id", since_id.to_string())]);
        }
        if let Some(max_id) = max_id {
            req = req.query(&[("max_id", max_id.to_string())]);
        }

        let resp = req.send().await.map_err(FeedError::http)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => FeedError::RateLimited,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FeedError::Auth(status),
                _ => FeedError::Api { status, body },
            });
        }

        let values: Vec<Value> = resp.json().await.map_err(FeedError::http)?;
        values.into_iter().map(Post::from_value).collect()
    }
}

#[async_trait::async_trait]
impl TimelineApi for TimelineClient {
    async fn fetch_since(
        &self,
        feed: FeedKind,
        since_id: u64,
        limit: usize,
    ) -> Result<Vec<Post>, FeedError> {
        let mut posts: Vec<Post> = Vec::new();
        let mut max_id: Option<u64> = None;
        while posts.len() < limit {
            let count = PAGE_SIZE.min(limit - posts.len());
            let page = self.fetch_page(feed, since_id, max_id, count).await?;
            if page.is_empty() {
                break;
            }
            max_id = next_max_id(&page);
            posts.extend(page);
            tracing::debug!(feed = feed.label(), fetched = posts.len(), "fetched page");
        }
        posts.truncate(limit);
        Ok(posts)
    }
}
