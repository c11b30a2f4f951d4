//! Inbound listener: forwards queue deliveries to the message handler.
//!
//! One task per consumed queue reads deliveries in broker order, maps
//! the routing key to the handler's topic form and awaits the handler
//! before taking the next delivery. Deliveries are auto-acknowledged,
//! so a handler failure is logged and the message is gone.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use tokio::task::JoinHandle;

use iota_protocol::topics;

use crate::channel::{Delivery, DeliveryStream};
use crate::interface::MessageHandler;

/// A delivery prepared for the message handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Routing key as received from the broker.
    pub raw_routing_key: String,
    /// Routing key with `.` replaced by `/`.
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn from_delivery(delivery: Delivery) -> Self {
        Self {
            topic: topics::normalize_inbound(&delivery.routing_key),
            raw_routing_key: delivery.routing_key,
            payload: delivery.payload,
            received_at: Utc::now(),
        }
    }

    /// Payload as text; invalid UTF-8 sequences are replaced.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Start a listener task for `queue`.
pub fn spawn(
    queue: String,
    deliveries: DeliveryStream,
    handler: Arc<dyn MessageHandler>,
) -> JoinHandle<()> {
    tokio::spawn(listen(queue, deliveries, handler))
}

/// Drain `deliveries` into `handler` until the stream ends or fails.
pub async fn listen(
    queue: String,
    mut deliveries: DeliveryStream,
    handler: Arc<dyn MessageHandler>,
) {
    tracing::debug!(queue = %queue, "queue listener started");

    while let Some(item) = deliveries.next().await {
        match item {
            Ok(delivery) => {
                let message = InboundMessage::from_delivery(delivery);
                dispatch(&queue, &message, handler.as_ref()).await;
            }
            Err(e) => {
                tracing::error!(
                    queue = %queue,
                    error = %e,
                    "consumer failed, queue listener stopping"
                );
                break;
            }
        }
    }

    tracing::debug!(queue = %queue, "queue listener stopped");
}

/// Hand one message to the handler. Failures stay with this message.
async fn dispatch(queue: &str, message: &InboundMessage, handler: &dyn MessageHandler) {
    tracing::debug!(
        queue,
        routing_key = %message.raw_routing_key,
        bytes = message.payload.len(),
        "AMQP message received"
    );

    if let Err(e) = handler.handle(&message.topic, &message.payload_text()).await {
        tracing::warn!(
            queue,
            topic = %message.topic,
            error = %e,
            "message handler failed, message dropped"
        );
    }
}
