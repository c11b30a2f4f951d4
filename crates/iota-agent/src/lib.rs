//! IoT Agent host for the AMQP binding.
//!
//! Library half of the `iota-agent` binary, split out so `iota-e2e-tests`
//! can wire the real collaborators (`StaticApiKeyResolver`,
//! `UltralightCodec`, `LoggingMessageHandler`) into a mock-backed binding.

pub mod codec;
pub mod config;
pub mod handler;
pub mod resolver;

pub use codec::UltralightCodec;
pub use config::AgentConfig;
pub use handler::LoggingMessageHandler;
pub use resolver::StaticApiKeyResolver;
