//! chatroom server entry point.

use chatroom::{runtime, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        outbound_limit = config.outbound_limit,
        admin_console = config.admin_console,
        "Starting chatroom server"
    );

    runtime::run(&config)?;
    Ok(())
}
