use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

const DEFAULT_FEED_BASE: &str = "https://api.twitter.com/1.1";
const DEFAULT_ROUND_WAIT_SECS: u64 = 360;
const DEFAULT_FETCH_MAX: usize = 500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3;

/// Feed API half of the process configuration.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

/// Search store half of the process configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub round_wait: Duration,
    pub fetch_max: usize,
}

impl Config {
    /// Read configuration from the environment (after `.env` is loaded).
    /// Missing credentials are fatal; knobs fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let feed_base =
            env::var("INDEXER_FEED_BASE").unwrap_or_else(|_| DEFAULT_FEED_BASE.to_string());
        let store_base = required("INDEXER_SEARCH_BASE")?;
        for (key, value) in [
            ("INDEXER_FEED_BASE", &feed_base),
            ("INDEXER_SEARCH_BASE", &store_base),
        ] {
            Url::parse(value).with_context(|| format!("{key} is not a valid URL: {value}"))?;
        }

        let timeout = Duration::from_secs(env_u64(
            "INDEXER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        ));

        Ok(Self {
            feed: FeedConfig {
                base_url: feed_base,
                token: required("INDEXER_FEED_TOKEN")?,
                timeout,
            },
            store: StoreConfig {
                base_url: store_base,
                username: required("INDEXER_SEARCH_USERNAME")?,
                password: required("INDEXER_SEARCH_PASSWORD")?,
                timeout,
            },
            round_wait: Duration::from_secs(env_u64(
                "INDEXER_ROUND_WAIT_SECS",
                DEFAULT_ROUND_WAIT_SECS,
            )),
            fetch_max: env_u64("INDEXER_FETCH_MAX", DEFAULT_FETCH_MAX as u64) as usize,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

// Unparseable overrides keep the default rather than failing boot.
fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}
