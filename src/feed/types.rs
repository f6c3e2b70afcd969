use serde_json::{Map, Value};

use super::FeedError;

const SNIPPET_CHARS: usize = 20;

/// A feed we poll incrementally. Each feed maps to one index in the search
/// store; the loop supports any number of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Home,
    Mentions,
}

impl FeedKind {
    pub fn all() -> [FeedKind; 2] {
        [FeedKind::Home, FeedKind::Mentions]
    }

    /// Name of the search-store index this feed's posts land in.
    pub fn index(&self) -> &'static str {
        match self {
            FeedKind::Home => "timeline",
            FeedKind::Mentions => "mentions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedKind::Home => "home",
            FeedKind::Mentions => "mentions",
        }
    }
}

/// One post as the feed API returned it: a numeric id plus whatever fields
/// came along. The id is the only part the sync core interprets; the rest is
/// carried opaquely into the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Post {
    pub id: u64,
    fields: Map<String, Value>,
}

impl Post {
    pub fn from_value(value: Value) -> Result<Self, FeedError> {
        let Value::Object(fields) = value else {
            return Err(FeedError::MalformedPost("post is not a JSON object".into()));
        };
        let id = fields
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| FeedError::MalformedPost("missing numeric id".into()))?;
        Ok(Self { id, fields })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Source-format creation time string, e.g. "Mon Jan 02 15:04:05 +0000 2006".
    pub fn created_at(&self) -> Option<&str> {
        self.fields.get("created_at").and_then(Value::as_str)
    }

    /// Author screen name, for log lines.
    pub fn author(&self) -> &str {
        self.fields
            .get("user")
            .and_then(|user| user.get("screen_name"))
            .and_then(Value::as_str)
            .unwrap_or("?")
    }

    /// Leading characters of the post text, for log lines.
    pub fn snippet(&self) -> String {
        self.fields
            .get("full_text")
            .or_else(|| self.fields.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .chars()
            .take(SNIPPET_CHARS)
            .collect()
    }
}
