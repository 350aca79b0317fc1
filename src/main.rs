mod cli;
mod client;
mod config;
mod engine;
mod error;
mod model;
mod orchestrator;
#[cfg(test)]
mod testing;
mod text_summary;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cfrun={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli::run(args).await {
        Ok(true) => Ok(()),
        // The failure reason has already been reported on the output feed.
        Ok(false) => std::process::exit(1),
        Err(e) => Err(e),
    }
}
