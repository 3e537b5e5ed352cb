use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod commands;

use args::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let _ = dotenvy::dotenv();

    let code = commands::run::run(&cli).await;
    std::process::exit(code);
}
