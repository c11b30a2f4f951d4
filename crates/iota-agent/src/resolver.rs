//! API key lookup for provisioned service groups.
//!
//! A device's API key comes from the group matching its exact
//! service/subservice pair. Devices outside every group fall back to the
//! agent-wide default key, if one is configured.

use std::collections::HashMap;

use async_trait::async_trait;

use iota_amqp_binding::ApiKeyResolver;

use crate::config::{AgentConfig, ServiceGroup};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no API key for service {service}{subservice} and no default key configured")]
    UnknownService { service: String, subservice: String },
}

/// Resolves API keys from a fixed set of service groups.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeyResolver {
    /// (service, subservice) → API key.
    groups: HashMap<(String, String), String>,
    default_key: Option<String>,
}

impl StaticApiKeyResolver {
    pub fn new(groups: &[ServiceGroup], default_key: Option<String>) -> Self {
        let groups = groups
            .iter()
            .map(|g| ((g.service.clone(), g.subservice.clone()), g.api_key.clone()))
            .collect();
        Self { groups, default_key }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(&config.services, config.default_api_key.clone())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Look up the key without going through the async trait.
    pub fn lookup(&self, service: &str, subservice: &str) -> Result<&str, ResolveError> {
        self.groups
            .get(&(service.to_string(), subservice.to_string()))
            .or(self.default_key.as_ref())
            .map(String::as_str)
            .ok_or_else(|| ResolveError::UnknownService {
                service: service.to_string(),
                subservice: subservice.to_string(),
            })
    }
}

#[async_trait]
impl ApiKeyResolver for StaticApiKeyResolver {
    async fn effective_api_key(&self, service: &str, subservice: &str) -> anyhow::Result<String> {
        let key = self.lookup(service, subservice)?;
        Ok(key.to_string())
    }
}
