//! AMQP binding lifecycle: the entry points the hosting agent calls.
//!
//! `start` runs the connection supervisor and keeps the resulting
//! session; `handle_command` runs the command pipeline on it; `stop`
//! closes it. Before a successful `start`, after `stop`, or once the
//! broker connection is lost, the binding is not started and commands
//! fail with [`BindingError::NotConnected`]. A later `start` reconnects.

use std::sync::Arc;

use iota_protocol::{CommandAttribute, Device};

use crate::channel::Connector;
use crate::command;
use crate::config::{AmqpConfig, redact_uri};
use crate::error::{BindingError, BindingResult};
use crate::interface::{ApiKeyResolver, MessageHandler, PayloadCodec};
use crate::supervisor::{self, BrokerSession};

/// Transport name reported to the agent.
pub const PROTOCOL: &str = "AMQP";

/// The AMQP transport binding of an IoT agent.
pub struct AmqpBinding<C: Connector> {
    connector: C,
    config: AmqpConfig,
    resolver: Arc<dyn ApiKeyResolver>,
    codec: Arc<dyn PayloadCodec>,
    handler: Arc<dyn MessageHandler>,
    session: Option<BrokerSession<C::Channel>>,
}

impl<C: Connector> AmqpBinding<C> {
    pub fn new(
        connector: C,
        config: AmqpConfig,
        resolver: Arc<dyn ApiKeyResolver>,
        codec: Arc<dyn PayloadCodec>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            connector,
            config,
            resolver,
            codec,
            handler,
            session: None,
        }
    }

    pub fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    pub fn is_started(&self) -> bool {
        self.live_session().is_some()
    }

    fn live_session(&self) -> Option<&BrokerSession<C::Channel>> {
        self.session.as_ref().filter(|session| session.is_open())
    }

    /// Connect, declare the topology and start consuming.
    ///
    /// On error nothing is left open and the binding stays unstarted.
    /// Calling `start` on a started binding is a no-op; a session whose
    /// connection was lost is closed and replaced.
    pub async fn start(&mut self) -> BindingResult<()> {
        if self.live_session().is_some() {
            tracing::warn!("AMQP binding already started");
            return Ok(());
        }
        if let Some(stale) = self.session.take() {
            tracing::warn!("AMQP connection lost, reconnecting");
            stale.close().await;
        }

        tracing::info!(uri = %redact_uri(&self.config.uri), "starting AMQP binding");

        match supervisor::establish(&self.connector, &self.config, self.handler.clone()).await {
            Ok(session) => {
                self.session = Some(session);
                tracing::info!("AMQP binding started");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "AMQP binding failed to start");
                Err(e)
            }
        }
    }

    /// Close the broker session if there is one. Never fails.
    pub async fn stop(&mut self) {
        tracing::info!("stopping AMQP binding");
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Publish a command-execution request to the device.
    pub async fn handle_command(
        &self,
        device: &Device,
        attributes: &[CommandAttribute],
    ) -> BindingResult<()> {
        let Some(session) = self.live_session() else {
            tracing::warn!(device_id = %device.id, "command received before AMQP binding started");
            return Err(BindingError::NotConnected);
        };

        command::execute(
            session,
            self.resolver.as_ref(),
            self.codec.as_ref(),
            device,
            attributes,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::channel::BrokerChannel;
    use crate::mock::{
        FailPoint, MockApiKeyResolver, MockCodec, MockConnector, RecordingHandler,
    };

    fn binding(connector: MockConnector) -> AmqpBinding<MockConnector> {
        AmqpBinding::new(
            connector,
            AmqpConfig::new("amqp://rabbitmq:5672"),
            Arc::new(MockApiKeyResolver::new().with_key("s1", "sub1", "KEY1")),
            Arc::new(MockCodec::new()),
            Arc::new(RecordingHandler::new()),
        )
    }

    fn ping() -> Vec<CommandAttribute> {
        vec![CommandAttribute::new("ping", json!([]))]
    }

    #[tokio::test]
    async fn start_then_stop_leaves_nothing_open() {
        let connector = MockConnector::new();
        let mock = connector.channel();
        let mut binding = binding(connector);

        binding.start().await.unwrap();
        assert!(binding.is_started());
        assert!(mock.is_open());

        binding.stop().await;
        assert!(!binding.is_started());
        assert!(!mock.is_open());
    }

    #[tokio::test]
    async fn stop_without_start_succeeds() {
        let connector = MockConnector::new();
        let mock = connector.channel();
        let mut binding = binding(connector);

        binding.stop().await;
        assert_eq!(mock.close_calls(), 0);
    }

    #[tokio::test]
    async fn stop_after_partial_start_succeeds() {
        let connector = MockConnector::new();
        connector.fail_at(FailPoint::BindQueue);
        let mock = connector.channel();
        let mut binding = binding(connector);

        assert!(binding.start().await.is_err());
        assert!(!binding.is_started());
        binding.stop().await;
        assert!(!mock.is_open());
    }

    #[tokio::test]
    async fn connect_failure_then_command_is_not_connected() {
        let connector = MockConnector::new();
        connector.fail_at(FailPoint::Connect);
        let mock = connector.channel();
        let mut binding = binding(connector);

        let err = binding.start().await.unwrap_err();
        assert!(matches!(err, BindingError::Connect { .. }));
        assert!(mock.declared_queues().is_empty());

        let device = Device::new("d1", "s1", "sub1");
        let err = binding.handle_command(&device, &ping()).await.unwrap_err();
        assert!(matches!(err, BindingError::NotConnected));
        assert!(mock.published().is_empty());
    }

    #[tokio::test]
    async fn command_after_start_is_published() {
        let connector = MockConnector::new();
        let mock = connector.channel();
        let mut binding = binding(connector);
        binding.start().await.unwrap();

        let device = Device::new("d1", "s1", "sub1");
        binding.handle_command(&device, &ping()).await.unwrap();

        let published = mock.published_to(".KEY1.d1.cmd");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "iota");
        binding.stop().await;
    }

    #[tokio::test]
    async fn second_start_keeps_existing_session() {
        let connector = MockConnector::new();
        let mock = connector.channel();
        let mut binding = binding(connector);

        binding.start().await.unwrap();
        binding.start().await.unwrap();
        assert_eq!(mock.connect_attempts(), 1);
        binding.stop().await;
    }

    #[tokio::test]
    async fn restart_after_stop_reconnects() {
        let connector = MockConnector::new();
        let mock = connector.channel();
        let mut binding = binding(connector);

        binding.start().await.unwrap();
        binding.stop().await;
        binding.start().await.unwrap();
        assert_eq!(mock.connect_attempts(), 2);
        assert!(mock.is_open());
        binding.stop().await;
    }

    #[tokio::test]
    async fn start_after_lost_connection_reconnects() {
        let connector = MockConnector::new();
        let mock = connector.channel();
        let mut binding = binding(connector);
        binding.start().await.unwrap();

        // broker drops the connection
        mock.close().await.unwrap();
        assert!(!binding.is_started());
        assert!(!mock.is_consuming("iotaqueue"));

        let device = Device::new("d1", "s1", "sub1");
        let err = binding.handle_command(&device, &ping()).await.unwrap_err();
        assert!(matches!(err, BindingError::NotConnected));

        binding.start().await.unwrap();
        assert!(binding.is_started());
        assert_eq!(mock.connect_attempts(), 2);
        assert!(mock.is_consuming("iotaqueue"));
        assert!(mock.is_consuming("iotaqueue_commands"));

        binding.handle_command(&device, &ping()).await.unwrap();
        assert_eq!(mock.published_to(".KEY1.d1.cmd").len(), 1);
        binding.stop().await;
    }

    #[test]
    fn reports_protocol_name() {
        assert_eq!(binding(MockConnector::new()).protocol(), "AMQP");
    }
}
