use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed::{FeedKind, TimelineClient};
use crate::store::SearchStore;
use crate::sync::SyncLoop;

/// `timeline-indexer run`
#[derive(clap::Args)]
pub struct RunCmd {
    /// Run a single cycle over all feeds and exit
    #[arg(long, default_value_t = false)]
    once: bool,
    /// Seconds to pause between cycles (overrides INDEXER_ROUND_WAIT_SECS)
    #[arg(long)]
    round_wait_secs: Option<u64>,
    /// Maximum posts fetched per feed per round (overrides INDEXER_FETCH_MAX)
    #[arg(long)]
    fetch_max: Option<usize>,
}

pub async fn run(cfg: &Config, args: RunCmd) -> Result<()> {
    let api = TimelineClient::new(cfg.feed.clone())?;
    let store = SearchStore::new(cfg.store.clone())?;
    let round_wait = args
        .round_wait_secs
        .map(Duration::from_secs)
        .unwrap_or(cfg.round_wait);
    let fetch_max = args.fetch_max.unwrap_or(cfg.fetch_max);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current round");
            token.cancel();
        }
    });

    let mut sync = SyncLoop::new(
        Arc::new(api),
        Arc::new(store),
        FeedKind::all().to_vec(),
        round_wait,
        fetch_max,
        shutdown,
    );
    sync.init().await?;

    if args.once {
        sync.run_cycle().await;
        return Ok(());
    }
    sync.run().await
}
