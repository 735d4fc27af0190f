//! Relay Gateway - Main entry point.

use anyhow::Result;
use relay_common::config::Config;
use relay_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration, then environment overrides, then validate
    let config = Config::load_and_validate()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Chat relay v{}", env!("CARGO_PKG_VERSION"));

    relay_gateway::start_server(&config).await
}
