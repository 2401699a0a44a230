mod cli;
mod export;

use anyhow::Result;
use clap::Parser; // needed for Cli::parse()
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::commands::run_cli;
use cli::opts::Cli;

fn main() -> Result<()> {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("studydeck_core={level},studydeck_json={level},studydeck={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("studydeck v{} starting", env!("CARGO_PKG_VERSION"));
    run_cli(args)
}
