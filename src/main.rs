use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

mod config;
mod feed;
mod init;
mod retry;
mod run;
mod status;
mod store;
mod sync;
mod telemetry;

#[derive(Parser)]
#[command(name = "timeline-indexer", about = "Timeline-to-search-store sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the search indices and exit
    Init(init::InitCmd),
    /// Run the sync loop
    Run(run::RunCmd),
    /// Show each feed's last known id
    Status(status::StatusCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    // initialize logging/tracing (stderr). Respect RUST_LOG and INDEXER_LOG_FORMAT
    telemetry::init_tracing();

    let cfg = config::Config::from_env()?;

    match cli.command {
        Commands::Init(args) => init::run(&cfg, args).await?,
        Commands::Run(args) => run::run(&cfg, args).await?,
        Commands::Status(args) => status::run(&cfg, args).await?,
    }

    Ok(())
}
