//! mmx market maker entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Bybit linear perpetual market maker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "MMX_CONFIG", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // before any TLS connection
    mmx_ws::init_crypto();

    let args = Args::parse();
    mmx_telemetry::init_logging()?;

    info!("Starting mmx-bot v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let config = mmx_bot::AppConfig::load(&args.config)?;
    info!(
        symbol = %config.instrument.symbol,
        testnet = config.exchange.testnet,
        rest_url = %config.exchange.rest_url(),
        "Configuration loaded"
    );

    let app = mmx_bot::Application::new(config)?;
    app.run().await?;

    info!("mmx-bot stopped");
    Ok(())
}
