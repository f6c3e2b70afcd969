use anyhow::Result;

use crate::config::Config;
use crate::feed::FeedKind;
use crate::store::{PostStore, SearchStore, StoreError};

/// `timeline-indexer status`
#[derive(clap::Args)]
pub struct StatusCmd {}

pub async fn run(cfg: &Config, _args: StatusCmd) -> Result<()> {
    let store = SearchStore::new(cfg.store.clone())?;
    for feed in FeedKind::all() {
        match store.last_known_id(feed.index()).await {
            Ok(id) => println!("{}: last known id {id}", feed.index()),
            Err(StoreError::EmptyIndex) => println!("{}: empty", feed.index()),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
