//! inboxd CLI entrypoint

use anyhow::Result;
use clap::Parser;

use inboxd::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.load_config()?;
    cli.init_tracing(&config)?;

    cli.execute(config).await
}
