// src/main.rs - printdeck entry point
use std::sync::Arc;

use clap::Parser;
use printdeck::config;
use printdeck::hass::{DisabledHomeAutomation, HassClient, HomeAutomation};
use printdeck::{PrinterRegistry, web};

#[derive(Parser, Debug)]
#[command(name = "printdeck", version, about = "Moonraker printer fleet aggregator")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the listen port from the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::info!("Starting printdeck {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config);

    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let hass: Arc<dyn HomeAutomation> = match &config.hass {
        Some(hass_config) => {
            let client = HassClient::new(hass_config, reqwest::Client::new());
            let probe = client.clone();
            tokio::spawn(async move { probe.wait_until_running().await });
            Arc::new(client)
        }
        None => {
            tracing::info!("No [hass] section; power control disabled");
            Arc::new(DisabledHomeAutomation)
        }
    };

    let registry = PrinterRegistry::start(&config, hass).map_err(|e| {
        tracing::error!("Invalid printer configuration: {}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    for key in registry.keys() {
        tracing::info!("Printer: {}", key);
    }

    let app = web::create_router(Arc::new(registry));

    let port = args.port.unwrap_or(config.port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
