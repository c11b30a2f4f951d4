//! Agent configuration, loadable from TOML with environment overrides.

use iota_amqp_binding::AmqpConfig;
use serde::Deserialize;

const ENV_AMQP_URI: &str = "IOTA_AMQP_URI";
const ENV_AMQP_EXCHANGE: &str = "IOTA_AMQP_EXCHANGE";
const ENV_AMQP_QUEUE: &str = "IOTA_AMQP_QUEUE";
const ENV_DEFAULT_API_KEY: &str = "IOTA_DEFAULT_API_KEY";

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// AMQP broker and topology settings.
    pub amqp: AmqpConfig,
    /// API key for services without a provisioned group.
    #[serde(default)]
    pub default_api_key: Option<String>,
    /// Provisioned service groups.
    #[serde(default)]
    pub services: Vec<ServiceGroup>,
}

/// A provisioned service/subservice and the API key its devices use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceGroup {
    pub service: String,
    pub subservice: String,
    pub api_key: String,
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `IOTA_*` overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok());
        self
    }

    /// Apply overrides from `lookup` (variable name → value).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = lookup(ENV_AMQP_URI) {
            self.amqp.uri = uri;
        }
        if let Some(exchange) = lookup(ENV_AMQP_EXCHANGE) {
            self.amqp.exchange = Some(exchange);
        }
        if let Some(queue) = lookup(ENV_AMQP_QUEUE) {
            self.amqp.queue = Some(queue);
        }
        if let Some(key) = lookup(ENV_DEFAULT_API_KEY) {
            self.default_api_key = Some(key);
        }
    }
}
