use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use storage_gateway_core::{GatewayConfig, GatewayMetrics, GatewayServer, GatewayState, Registry};
use tracing::info;

pub async fn run(config_path: &str, bind: Option<&str>) -> Result<()> {
    info!("Loading configuration from: {}", config_path);
    let config = GatewayConfig::load(config_path).await?;

    let bind_address: SocketAddr = match bind {
        Some(addr) => addr
            .parse()
            .with_context(|| format!("invalid bind address {}", addr))?,
        None => config.server.bind_address,
    };

    let metrics = Arc::new(GatewayMetrics::new());
    let registry = Registry::from_config(&config, Some(Arc::clone(&metrics)))?;

    let state = GatewayState::new(Arc::new(registry), &config.server).with_metrics(metrics);
    let server = GatewayServer::new(bind_address, Arc::new(state));
    server.run_until_shutdown().await?;

    info!("Gateway stopped");
    Ok(())
}
