use anyhow::Context;
use forward_proxy::{config::ProxyConfig, init_proxy, observability::init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/proxy.yaml".to_string());

    let config = ProxyConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_tracing(config.logging.format)?;

    init_proxy(config).await.context("Proxy error")?;

    Ok(())
}
