mod ai;
mod auth;
mod cli;
mod config;
mod diff;
mod error;
mod events;
mod incident;
mod output;
mod providers;
mod remediation;
mod store;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting pipefix");
    if !cli.execute().await? {
        std::process::exit(1);
    }

    Ok(())
}
