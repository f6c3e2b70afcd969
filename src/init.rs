use anyhow::Result;

use crate::config::Config;
use crate::feed::FeedKind;
use crate::store::{PostStore, SearchStore};

/// `timeline-indexer init`
#[derive(clap::Args)]
pub struct InitCmd {}

pub async fn run(cfg: &Config, _args: InitCmd) -> Result<()> {
    let store = SearchStore::new(cfg.store.clone())?;
    for feed in FeedKind::all() {
        store.ensure_index(feed.index()).await?;
        store.configure_index(feed.index()).await?;
        println!("index ready: {}", feed.index());
    }
    Ok(())
}
