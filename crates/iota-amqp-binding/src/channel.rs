//! Broker channel: the one AMQP connection/channel pair of the binding.
//!
//! `BrokerChannel` is the seam every declare, bind, consume and publish
//! goes through (mockable in tests). `Connector` opens it. The production
//! implementation wraps a `lapin::Connection` plus a single
//! `lapin::Channel` multiplexed over it.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{ExchangeOptions, redact_uri};
use crate::error::{BindingError, BindingResult};

const REPLY_SUCCESS: u16 = 200;

/// A message taken off a queue, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Ordered stream of deliveries from one queue.
pub type DeliveryStream = BoxStream<'static, BindingResult<Delivery>>;

// ── Broker traits ─────────────────────────────────────────────

/// Operations the binding issues on its single broker channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a topic exchange. Idempotent on the broker side.
    async fn declare_exchange(&self, exchange: &str, options: ExchangeOptions)
    -> BindingResult<()>;

    /// Declare a non-exclusive queue.
    async fn declare_queue(&self, queue: &str) -> BindingResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> BindingResult<()>;

    /// Start an auto-acknowledged consumer on `queue`.
    async fn consume(&self, queue: &str) -> BindingResult<DeliveryStream>;

    /// Publish `payload` to `exchange` with `routing_key`.
    ///
    /// Returns once the local client accepted the frame. Broker
    /// confirmation is not awaited.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8])
    -> BindingResult<()>;

    /// Close the channel and its connection.
    async fn close(&self) -> BindingResult<()>;

    fn is_open(&self) -> bool;
}

/// Opens the connection and its channel.
#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: BrokerChannel + 'static;

    /// Open within `timeout`. On any error, including the timeout, a
    /// connection that was already established is closed before returning.
    async fn open(&self, uri: &str, timeout: Duration) -> BindingResult<Self::Channel>;
}

// ── lapin implementation ──────────────────────────────────────

/// Connects to a real AMQP 0-9-1 broker (RabbitMQ).
#[derive(Debug, Default, Clone, Copy)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    type Channel = AmqpChannel;

    async fn open(&self, uri: &str, timeout: Duration) -> BindingResult<AmqpChannel> {
        let connect_error = |e: lapin::Error| BindingError::Connect {
            uri: redact_uri(uri),
            reason: e.to_string(),
        };
        let deadline = Instant::now() + timeout;

        let connection = tokio::time::timeout_at(
            deadline,
            Connection::connect(uri, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| BindingError::timeout(timeout))?
        .map_err(connect_error)?;

        let channel = match tokio::time::timeout_at(deadline, connection.create_channel()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                close_half_open(&connection, "channel failed").await;
                return Err(connect_error(e));
            }
            Err(_) => {
                close_half_open(&connection, "channel timed out").await;
                return Err(BindingError::timeout(timeout));
            }
        };

        Ok(AmqpChannel {
            uri: redact_uri(uri),
            connection,
            channel,
        })
    }
}

async fn close_half_open(connection: &Connection, reason: &str) {
    if let Err(e) = connection.close(REPLY_SUCCESS, reason).await {
        tracing::warn!(error = %e, "failed to close half-open AMQP connection");
    }
}

/// A lapin connection with the one channel the binding uses.
pub struct AmqpChannel {
    uri: String,
    connection: Connection,
    channel: lapin::Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(
        &self,
        exchange: &str,
        options: ExchangeOptions,
    ) -> BindingResult<()> {
        let declare = ExchangeDeclareOptions {
            durable: options.durable,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(exchange, ExchangeKind::Topic, declare, FieldTable::default())
            .await
            .map_err(|e| BindingError::Declare {
                target: format!("exchange '{exchange}'"),
                reason: e.to_string(),
            })
    }

    async fn declare_queue(&self, queue: &str) -> BindingResult<()> {
        let declare = QueueDeclareOptions {
            exclusive: false,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, declare, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| BindingError::Declare {
                target: format!("queue '{queue}'"),
                reason: e.to_string(),
            })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> BindingResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BindingError::Declare {
                target: format!("binding '{queue}' -> '{exchange}' ({pattern})"),
                reason: e.to_string(),
            })
    }

    async fn consume(&self, queue: &str) -> BindingResult<DeliveryStream> {
        let consumer_tag = format!("iota-{queue}-{}", Uuid::now_v7());
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, &consumer_tag, options, FieldTable::default())
            .await
            .map_err(|e| BindingError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let queue = queue.to_string();
        let stream = consumer.map(move |item| {
            item.map(|delivery| Delivery {
                routing_key: delivery.routing_key.as_str().to_string(),
                payload: delivery.data,
            })
            .map_err(|e| BindingError::Subscribe {
                queue: queue.clone(),
                reason: e.to_string(),
            })
        });
        Ok(stream.boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> BindingResult<()> {
        // The returned confirm is dropped: publisher confirms are not enabled.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| BindingError::Publish {
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn close(&self) -> BindingResult<()> {
        let channel_closed = if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "binding stopped").await
        } else {
            Ok(())
        };
        let connection_closed = if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "binding stopped").await
        } else {
            Ok(())
        };

        channel_closed
            .and(connection_closed)
            .map_err(|e| BindingError::Connect {
                uri: self.uri.clone(),
                reason: format!("close failed: {e}"),
            })
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}
