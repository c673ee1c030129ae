//! MeshGuard CLI entry point

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meshguard_cli::{AppConfig, Cli, CommandDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref())?;

    // Initialize logging
    setup_logging(cli.verbose, &config.cli.log_filter);

    CommandDispatcher::execute(cli, config).await?;

    info!("MeshGuard CLI exited");
    Ok(())
}

/// `RUST_LOG` wins over the configured filter; `--verbose` forces debug
fn setup_logging(verbose: bool, configured: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
