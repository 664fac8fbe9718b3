//! boardsync CLI: daily notice-board sync and event consensus.
//!
//! Runs the crawl, translate, reconcile, and merge stages against a local
//! libSQL store, either together (`run`) or one at a time.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
