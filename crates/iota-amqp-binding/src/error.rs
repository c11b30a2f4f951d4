//! AMQP binding error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running the AMQP binding.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("cannot connect to broker at {uri}: {reason}")]
    Connect { uri: String, reason: String },

    #[error("broker setup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("failed to declare {target}: {reason}")]
    Declare { target: String, reason: String },

    #[error("failed to consume queue '{queue}': {reason}")]
    Subscribe { queue: String, reason: String },

    #[error("no API key for service '{service}' subservice '{subservice}': {reason}")]
    ApiKeyResolution {
        service: String,
        subservice: String,
        reason: String,
    },

    #[error("cannot encode command '{command}' for device '{device_id}': {reason}")]
    Codec {
        device_id: String,
        command: String,
        reason: String,
    },

    #[error("publish to '{routing_key}' failed: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("AMQP binding is not connected")]
    NotConnected,
}

impl BindingError {
    /// Setup step exceeded `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Convenience alias for binding results.
pub type BindingResult<T> = Result<T, BindingError>;
