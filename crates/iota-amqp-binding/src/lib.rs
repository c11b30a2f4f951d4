//! AMQP transport binding for the IoT Agent.
//!
//! Connects the agent's device/command model to a RabbitMQ topic exchange:
//! - `AmqpBinding` lifecycle (`start`/`stop`/`handle_command`)
//! - `BrokerChannel` / `Connector` traits for the single broker channel
//!   (mockable in tests), with a `lapin` implementation for production
//! - Connection supervisor declaring the exchange, queues and bindings
//! - Command pipeline publishing one message per command attribute
//! - Inbound listener forwarding measures and command results to the
//!   agent's `MessageHandler`

pub mod binding;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod handler;
pub mod interface;
pub mod mock;
pub mod supervisor;

// Re-exports for convenience.
pub use binding::{AmqpBinding, PROTOCOL};
pub use channel::{AmqpChannel, AmqpConnector, BrokerChannel, Connector, Delivery};
pub use config::{AmqpConfig, ExchangeConfig, ExchangeOptions};
pub use error::{BindingError, BindingResult};
pub use handler::InboundMessage;
pub use interface::{ApiKeyResolver, MessageHandler, PayloadCodec};
pub use mock::{MockChannel, MockConnector};
pub use supervisor::BrokerSession;
