use anyhow::Result;
use identity_core::{config::Config, server, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let metrics_handle = telemetry::init(&config)?;

    info!("Starting Identity Core Service");
    info!("HTTP server listening on {}", config.http_addr());

    server::run(config, metrics_handle).await
}
