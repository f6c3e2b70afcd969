//! Search-store client: index provisioning, idempotent upserts keyed by post
//! id, and the last-known-id query the sync loop uses to rebuild its cursors
//! after a restart.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::StoreConfig;
use crate::feed::Post;

// Source-side creation time, e.g. "Mon Jan 02 15:04:05 +0000 2006".
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
const FIELD_LIMIT: u32 = 1500;
// Immediate retries for connect-level failures, below the application retry
// policy. Timeouts and HTTP statuses are left to the caller's policy so the
// two layers never multiply sleeps.
const TRANSPORT_RETRIES: usize = 5;

/// Seam between the sync loop and the document store.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Create the index with its settings and mappings. Safe to call when the
    /// index already exists.
    async fn ensure_index(&self, index: &str) -> Result<(), StoreError>;
    /// Re-apply the field-count limit. Same idempotency expectation.
    async fn configure_index(&self, index: &str) -> Result<(), StoreError>;
    /// Create-or-overwrite the document keyed by the post's id.
    async fn upsert(&self, index: &str, post: &Post) -> Result<(), StoreError>;
    /// Highest id currently persisted in the index.
    async fn last_known_id(&self, index: &str) -> Result<u64, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Http(reqwest::Error),
    Timeout,
    /// Non-success status on a strict call.
    Status { status: StatusCode, body: String },
    /// The last-known-id query matched nothing; callers default the cursor to 0.
    EmptyIndex,
    MissingCreatedAt(u64),
    BadCreatedAt { id: u64, value: String },
    Decode(String),
}

impl StoreError {
    fn http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Http(err)
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Http(err) => write!(f, "http error: {err}"),
            StoreError::Timeout => write!(f, "request timed out"),
            StoreError::Status { status, body } => {
                write!(f, "search store returned {status}: {body}")
            }
            StoreError::EmptyIndex => write!(f, "index has no documents"),
            StoreError::MissingCreatedAt(id) => write!(f, "post {id} has no created_at field"),
            StoreError::BadCreatedAt { id, value } => {
                write!(f, "post {id} has unparseable created_at {value:?}")
            }
            StoreError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// Epoch milliseconds (float, matching the store's `created_timestamp`
/// mapping) for a source-format creation time.
fn created_timestamp_millis(created_at: &str) -> chrono::format::ParseResult<f64> {
    let t = DateTime::parse_from_str(created_at, CREATED_AT_FORMAT)?;
    Ok(t.timestamp_millis() as f64)
}

/// The document body for a post: its fields plus the derived
/// `created_timestamp`.
fn document_body(post: &Post) -> Result<Value, StoreError> {
    let created_at = post
        .created_at()
        .ok_or(StoreError::MissingCreatedAt(post.id))?;
    let ts = created_timestamp_millis(created_at).map_err(|_| StoreError::BadCreatedAt {
        id: post.id,
        value: created_at.to_string(),
    })?;
    let mut fields = post.fields().clone();
    fields.insert("created_timestamp".to_string(), json!(ts));
    Ok(Value::Object(fields))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
}

fn top_hit_id(resp: &SearchResponse) -> Result<u64, StoreError> {
    let hit = resp.hits.hits.first().ok_or(StoreError::EmptyIndex)?;
    hit.id
        .parse::<u64>()
        .map_err(|_| StoreError::Decode(format!("non-numeric _id {:?}", hit.id)))
}

/// HTTP client for the search store. Every request carries basic auth and the
/// configured timeout.
pub struct SearchStore {
    http: HttpClient,
    cfg: StoreConfig,
}

impl SearchStore {
    pub fn new(cfg: StoreConfig) -> Result<Self, StoreError> {
        let http = HttpClient::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(StoreError::http)?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.cfg.base_url.trim_end_matches('/'))
    }

    fn put(&self, path: &str, body: &Value) -> RequestBuilder {
        self.http
            .put(self.endpoint(path))
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .json(body)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        for _ in 0..TRANSPORT_RETRIES - 1 {
            let Some(attempt) = req.try_clone() else { break };
            match attempt.send().await {
                Err(err) if err.is_connect() => {
                    tracing::debug!("connect failed: {err}, retrying");
                }
                other => return other.map_err(StoreError::http),
            }
        }
        req.send().await.map_err(StoreError::http)
    }
}

#[async_trait]
impl PostStore for SearchStore {
    async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        let body = json!({
            "settings": {
                "index.mapping.total_fields.limit": FIELD_LIMIT,
            },
            "mappings": {
                "properties": {
                    "created_timestamp": { "type": "date_nanos" }
                }
            }
        });
        let resp = self.send(self.put(index, &body)).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(StoreError::http)?;
        if status.is_success() {
            tracing::info!(index, "{text}");
        } else {
            // typically resource_already_exists; not fatal
            tracing::warn!(index, "{text}");
        }
        Ok(())
    }

    async fn configure_index(&self, index: &str) -> Result<(), StoreError> {
        let body = json!({
            "index.mapping.total_fields.limit": FIELD_LIMIT,
        });
        let resp = self
            .send(self.put(&format!("{index}/_settings"), &body))
            .await?;
        let status = resp.status();
        let text = resp.text().await.map_err(StoreError::http)?;
        if status.is_success() {
            tracing::info!(index, "{text}");
        } else {
            tracing::warn!(index, "{text}");
        }
        Ok(())
    }

    async fn upsert(&self, index: &str, post: &Post) -> Result<(), StoreError> {
        let doc = document_body(post)?;
        let req = self
            .http
            .post(self.endpoint(&format!("{index}/_doc/{}", post.id)))
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .json(&doc);
        let resp = self.send(req).await?;
        let status = resp.status();
        let body = resp.text().await.map_err(StoreError::http)?;
        tracing::info!(
            "{} => {}@{}: {}",
            status.as_u16(),
            post.id,
            post.author(),
            post.snippet()
        );
        if status != StatusCode::CREATED {
            // The write was acknowledged with an unexpected code; the item
            // counts as attempted and the round moves on.
            tracing::error!("{body}");
        } else {
            tracing::debug!("{body}");
        }
        Ok(())
    }

    async fn last_known_id(&self, index: &str) -> Result<u64, StoreError> {
        let query = json!({
            "_source": ["_id"],
            "query": {
                "match_all": {}
            },
            "size": 1,
            "sort": [
                { "_id": { "order": "desc" } }
            ],
        });
        let req = self
            .http
            .get(self.endpoint(&format!("{index}/_doc/_search")))
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .json(&query);
        let resp = self.send(req).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        let id = top_hit_id(&parsed)?;
        tracing::info!("last known id for index {index} is {id}");
        Ok(id)
    }
}

/// In-memory store for tests: documents are last-write-wins by id, cursor
/// lookups pop queued results, and upserts can be failed per post id with a
/// transport-class error.
#[derive(Default)]
pub struct MockStore {
    documents: Mutex<HashMap<String, BTreeMap<u64, Value>>>,
    cursor_results: Mutex<HashMap<String, VecDeque<Result<u64, StoreError>>>>,
    failing_ids: Mutex<HashSet<u64>>,
    upsert_attempts: Mutex<HashMap<u64, u32>>,
    provisioned: Mutex<Vec<String>>,
    configured: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_cursor(&self, index: &str, result: Result<u64, StoreError>) {
        self.cursor_results
            .lock()
            .unwrap()
            .entry(index.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn fail_uploads_for(&self, id: u64) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    pub fn documents(&self, index: &str) -> Vec<(u64, Value)> {
        self.documents
            .lock()
            .unwrap()
            .get(index)
            .map(|docs| docs.iter().map(|(id, doc)| (*id, doc.clone())).collect())
            .unwrap_or_default()
    }

    pub fn upsert_attempts(&self, id: u64) -> u32 {
        self.upsert_attempts
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub fn provisioned(&self) -> Vec<String> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn configured(&self) -> Vec<String> {
        self.configured.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostStore for MockStore {
    async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        self.provisioned.lock().unwrap().push(index.to_string());
        Ok(())
    }

    async fn configure_index(&self, index: &str) -> Result<(), StoreError> {
        self.configured.lock().unwrap().push(index.to_string());
        Ok(())
    }

    async fn upsert(&self, index: &str, post: &Post) -> Result<(), StoreError> {
        *self.upsert_attempts.lock().unwrap().entry(post.id).or_insert(0) += 1;
        if self.failing_ids.lock().unwrap().contains(&post.id) {
            return Err(StoreError::Timeout);
        }
        let doc = document_body(post)?;
        self.documents
            .lock()
            .unwrap()
            .entry(index.to_string())
            .or_default()
            .insert(post.id, doc);
        Ok(())
    }

    async fn last_known_id(&self, index: &str) -> Result<u64, StoreError> {
        self.cursor_results
            .lock()
            .unwrap()
            .get_mut(index)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Err(StoreError::EmptyIndex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_epoch_millis_from_source_format() {
        let ts = created_timestamp_millis("Mon Jan 02 15:04:05 +0000 2006").unwrap();
        assert_eq!(ts, 1_136_214_245_000.0);
    }

    #[test]
    fn derives_millis_across_offsets() {
        let utc = created_timestamp_millis("Mon Jan 02 15:04:05 +0000 2006").unwrap();
        let shifted = created_timestamp_millis("Mon Jan 02 16:04:05 +0100 2006").unwrap();
        assert_eq!(utc, shifted);
    }

    #[test]
    fn rejects_malformed_created_at() {
        assert!(created_timestamp_millis("2006-01-02T15:04:05Z").is_err());
    }

    #[test]
    fn document_body_injects_timestamp_and_keeps_fields() {
        let post = Post::from_value(json!({
            "id": 7,
            "created_at": "Mon Jan 02 15:04:05 +0000 2006",
            "full_text": "hello",
        }))
        .unwrap();
        let doc = document_body(&post).unwrap();
        assert_eq!(doc["created_timestamp"], json!(1_136_214_245_000.0));
        assert_eq!(doc["full_text"], "hello");
        assert_eq!(doc["id"], 7);
    }

    #[test]
    fn document_body_requires_created_at() {
        let post = Post::from_value(json!({ "id": 7 })).unwrap();
        assert!(matches!(
            document_body(&post),
            Err(StoreError::MissingCreatedAt(7))
        ));
    }

    #[test]
    fn top_hit_id_parses_and_flags_empty() {
        let populated: SearchResponse = serde_json::from_value(json!({
            "hits": { "hits": [ { "_id": "4711" } ] }
        }))
        .unwrap();
        assert_eq!(top_hit_id(&populated).unwrap(), 4711);

        let empty: SearchResponse = serde_json::from_value(json!({
            "hits": { "hits": [] }
        }))
        .unwrap();
        assert!(matches!(top_hit_id(&empty), Err(StoreError::EmptyIndex)));

        let garbled: SearchResponse = serde_json::from_value(json!({
            "hits": { "hits": [ { "_id": "not-a-number" } ] }
        }))
        .unwrap();
        assert!(matches!(top_hit_id(&garbled), Err(StoreError::Decode(_))));
    }

    #[test]
    fn status_error_display_names_the_code() {
        let err = StoreError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: "upstream down".into(),
        };
        assert_eq!(
            format!("{err}"),
            "search store returned 502 Bad Gateway: upstream down"
        );
    }
}
