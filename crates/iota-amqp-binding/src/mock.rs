//! Mock broker and collaborators for testing without RabbitMQ.
//!
//! Records every declare, bind and publish for assertion in tests,
//! injects failures at a chosen step, and lets tests push deliveries
//! into consumed queues. Also provides in-memory stand-ins for the
//! API-key resolver, payload codec and message handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::StreamExt;

use iota_protocol::Device;

use crate::channel::{BrokerChannel, Connector, Delivery, DeliveryStream};
use crate::config::{ExchangeOptions, redact_uri};
use crate::error::{BindingError, BindingResult};
use crate::interface::{ApiKeyResolver, MessageHandler, PayloadCodec};

/// A recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }
}

/// A recorded queue binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub pattern: String,
}

/// Step at which the mock broker reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Connect,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    Consume,
    Publish,
}

#[derive(Default)]
struct MockState {
    open: bool,
    fail_point: Option<FailPoint>,
    declare_delay: Option<Duration>,
    connect_attempts: usize,
    close_calls: usize,
    exchanges: Vec<(String, ExchangeOptions)>,
    queues: Vec<String>,
    bindings: Vec<QueueBinding>,
    published: Vec<PublishedMessage>,
    consumers: HashMap<String, mpsc::UnboundedSender<BindingResult<Delivery>>>,
}

/// Mock implementation of the `BrokerChannel` trait.
///
/// Clones share state, so a test can keep a handle while the binding
/// owns another. Thread-safe via `Mutex` (fine for test contexts).
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given step fail from now on.
    pub fn fail_at(&self, point: FailPoint) {
        self.state().fail_point = Some(point);
    }

    /// Stall every exchange declaration for `delay`.
    pub fn set_declare_delay(&self, delay: Duration) {
        self.state().declare_delay = Some(delay);
    }

    /// Remove any injected failure.
    pub fn clear_failure(&self) {
        self.state().fail_point = None;
    }

    /// Get all declared exchanges, in declaration order (repeats included).
    pub fn declared_exchanges(&self) -> Vec<(String, ExchangeOptions)> {
        self.state().exchanges.clone()
    }

    /// Get all declared queues, in declaration order.
    pub fn declared_queues(&self) -> Vec<String> {
        self.state().queues.clone()
    }

    pub fn bindings(&self) -> Vec<QueueBinding> {
        self.state().bindings.clone()
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    /// Get published messages for a specific routing key.
    pub fn published_to(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.state()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Check whether a consumer was started on the given queue.
    pub fn is_consuming(&self, queue: &str) -> bool {
        self.state().consumers.contains_key(queue)
    }

    /// Push a delivery into a consumed queue.
    /// Returns false if nothing consumes the queue.
    pub fn deliver(&self, queue: &str, routing_key: &str, payload: &[u8]) -> bool {
        let delivery = Delivery {
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        };
        self.push(queue, Ok(delivery))
    }

    /// Push a consumer error into a consumed queue.
    pub fn deliver_error(&self, queue: &str, reason: &str) -> bool {
        let err = BindingError::Subscribe {
            queue: queue.to_string(),
            reason: reason.to_string(),
        };
        self.push(queue, Err(err))
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    /// Clear all recorded state, keeping the connection status.
    pub fn reset(&self) {
        let mut state = self.state();
        state.exchanges.clear();
        state.queues.clear();
        state.bindings.clear();
        state.published.clear();
    }

    fn push(&self, queue: &str, item: BindingResult<Delivery>) -> bool {
        self.state()
            .consumers
            .get(queue)
            .is_some_and(|tx| tx.unbounded_send(item).is_ok())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn check(&self, point: FailPoint) -> BindingResult<()> {
        let state = self.state();
        if !state.open {
            return Err(BindingError::NotConnected);
        }
        if state.fail_point == Some(point) {
            return Err(injected(point));
        }
        Ok(())
    }
}

fn injected(point: FailPoint) -> BindingError {
    let reason = "injected failure".to_string();
    match point {
        FailPoint::Connect => BindingError::Connect {
            uri: "mock".into(),
            reason,
        },
        FailPoint::DeclareExchange => BindingError::Declare {
            target: "exchange".into(),
            reason,
        },
        FailPoint::DeclareQueue => BindingError::Declare {
            target: "queue".into(),
            reason,
        },
        FailPoint::BindQueue => BindingError::Declare {
            target: "binding".into(),
            reason,
        },
        FailPoint::Consume => BindingError::Subscribe {
            queue: "mock".into(),
            reason,
        },
        FailPoint::Publish => BindingError::Publish {
            routing_key: "mock".into(),
            reason,
        },
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_exchange(
        &self,
        exchange: &str,
        options: ExchangeOptions,
    ) -> BindingResult<()> {
        let delay = self.state().declare_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(FailPoint::DeclareExchange)?;
        self.state().exchanges.push((exchange.to_string(), options));
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> BindingResult<()> {
        self.check(FailPoint::DeclareQueue)?;
        self.state().queues.push(queue.to_string());
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> BindingResult<()> {
        self.check(FailPoint::BindQueue)?;
        self.state().bindings.push(QueueBinding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
        });
        Ok(())
    }

    async fn consume(&self, queue: &str) -> BindingResult<DeliveryStream> {
        self.check(FailPoint::Consume)?;
        let (tx, rx) = mpsc::unbounded();
        self.state().consumers.insert(queue.to_string(), tx);
        Ok(rx.boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> BindingResult<()> {
        self.check(FailPoint::Publish).map_err(|e| match e {
            BindingError::Publish { reason, .. } => BindingError::Publish {
                routing_key: routing_key.to_string(),
                reason,
            },
            other => other,
        })?;
        self.state().published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> BindingResult<()> {
        let mut state = self.state();
        state.close_calls += 1;
        state.open = false;
        // Dropping the senders ends every consumer stream.
        state.consumers.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}

/// Mock implementation of the `Connector` trait.
///
/// Hands out clones of one shared `MockChannel`.
#[derive(Clone, Default)]
pub struct MockConnector {
    channel: MockChannel,
    connect_delay: Option<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `open` call, e.g. to exercise setup timeouts.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Handle to the channel this connector hands out.
    pub fn channel(&self) -> MockChannel {
        self.channel.clone()
    }

    pub fn fail_at(&self, point: FailPoint) {
        self.channel.fail_at(point);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Channel = MockChannel;

    async fn open(&self, uri: &str, timeout: Duration) -> BindingResult<MockChannel> {
        self.channel.state().connect_attempts += 1;

        if let Some(delay) = self.connect_delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay)).await.is_err() {
                return Err(BindingError::timeout(timeout));
            }
        }

        let mut state = self.channel.state();
        if state.fail_point == Some(FailPoint::Connect) {
            return Err(BindingError::Connect {
                uri: redact_uri(uri),
                reason: "connection refused".into(),
            });
        }
        state.open = true;
        drop(state);

        Ok(self.channel.clone())
    }
}

// ── Collaborators ─────────────────────────────────────────────

/// Resolver backed by a fixed service/subservice → API key table.
#[derive(Default)]
pub struct MockApiKeyResolver {
    keys: HashMap<(String, String), String>,
    calls: Mutex<usize>,
}

impl MockApiKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, service: &str, subservice: &str, api_key: &str) -> Self {
        self.keys
            .insert((service.to_string(), subservice.to_string()), api_key.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ApiKeyResolver for MockApiKeyResolver {
    async fn effective_api_key(&self, service: &str, subservice: &str) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;
        self.keys
            .get(&(service.to_string(), subservice.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown service"))
    }
}

/// Codec producing `{device}@{command}|{value}`, optionally failing for
/// one command name.
#[derive(Default)]
pub struct MockCodec {
    fail_command: Option<String>,
}

impl MockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(command: &str) -> Self {
        Self {
            fail_command: Some(command.to_string()),
        }
    }
}

impl PayloadCodec for MockCodec {
    fn command_payload(
        &self,
        device: &Device,
        command: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<String> {
        if self.fail_command.as_deref() == Some(command) {
            anyhow::bail!("unsupported command value");
        }
        Ok(format!("{}@{command}|{value}", device.id))
    }
}

/// Message handler that records every `(topic, payload)` it receives.
#[derive(Default)]
pub struct RecordingHandler {
    received: Mutex<Vec<(String, String)>>,
    fail_payload: Mutex<Option<String>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an error (after recording) for messages with this payload.
    pub fn fail_on(&self, payload: &str) {
        *self.fail_payload.lock().unwrap() = Some(payload.to_string());
    }

    pub fn received(&self) -> Vec<(String, String)> {
        self.received.lock().unwrap().clone()
    }

    /// Poll until at least `count` messages arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(String, String)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
        self.received
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        if self.fail_payload.lock().unwrap().as_deref() == Some(payload) {
            anyhow::bail!("cannot parse payload");
        }
        Ok(())
    }
}
