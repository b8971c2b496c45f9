//! ContentFlow CLI: content-ingestion runs from an issue tracker into the content store.
//!
//! Polls the tracker for new content tasks, moves them through the editorial
//! workflow and merges their normalized records into the store file.

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
