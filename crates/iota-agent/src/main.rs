//! IoT Agent: Ultralight devices over an AMQP topic exchange.
//!
//! Loads the agent config, starts the AMQP binding and runs until
//! SIGINT, then closes the broker session.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use iota_agent::{AgentConfig, LoggingMessageHandler, StaticApiKeyResolver, UltralightCodec};
use iota_amqp_binding::{AmqpBinding, AmqpConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "iota-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/iota/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?.with_env_overrides();
    let exchange = config.amqp.exchange_config();
    tracing::info!(
        exchange = %exchange.exchange,
        queue = %exchange.queue,
        service_groups = config.services.len(),
        "config loaded"
    );

    // ── Collaborators ───────────────────────────────────────────
    let resolver = StaticApiKeyResolver::from_config(&config);
    if resolver.is_empty() && config.default_api_key.is_none() {
        tracing::warn!("no service groups or default API key, every command will fail");
    }
    let handler = Arc::new(LoggingMessageHandler::new());

    // ── AMQP binding ────────────────────────────────────────────
    let mut binding = AmqpBinding::new(
        AmqpConnector,
        config.amqp,
        Arc::new(resolver),
        Arc::new(UltralightCodec::new()),
        handler.clone(),
    );
    binding.start().await?;

    tracing::info!(protocol = binding.protocol(), "iota-agent ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    binding.stop().await;

    let stats = handler.stats();
    tracing::info!(
        measures = stats.measures,
        command_results = stats.command_results,
        "iota-agent stopped"
    );
    Ok(())
}
