//! `pke serve`: start the HTTP API server.

use pke_config::AppConfig;
use tracing::info;

pub async fn run(
    port_override: Option<u16>,
    store_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(backend) = store_override {
        config.store.backend = backend;
        config.validate()?;
    }

    println!("PKE Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store:     {}", config.store.backend);
    println!(
        "   Audit:     {} day retention",
        config.audit.retention_days
    );

    info!(
        backend = %config.store.backend,
        port = config.gateway.port,
        "Starting gateway"
    );
    pke_gateway::start(config).await?;

    Ok(())
}
