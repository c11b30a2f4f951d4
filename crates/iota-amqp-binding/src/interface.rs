//! Collaborators the binding depends on but does not implement.
//!
//! The hosting agent supplies all three. They return `anyhow::Result`
//! so implementations can surface any error; the binding wraps failures
//! in a [`BindingError`](crate::error::BindingError) with device and
//! routing context before reporting them.

use async_trait::async_trait;

use iota_protocol::Device;

/// Resolves the API key that scopes a service's routing keys.
#[async_trait]
pub trait ApiKeyResolver: Send + Sync {
    /// Effective API key for `service`/`subservice`.
    async fn effective_api_key(&self, service: &str, subservice: &str) -> anyhow::Result<String>;
}

/// Builds the wire payload for one command invocation.
pub trait PayloadCodec: Send + Sync {
    fn command_payload(
        &self,
        device: &Device,
        command: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<String>;
}

/// The agent's transport-independent inbound pipeline.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message. `topic` is the normalized
    /// (`/`-separated) routing key.
    async fn handle(&self, topic: &str, payload: &str) -> anyhow::Result<()>;
}
