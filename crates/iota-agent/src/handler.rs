//! Inbound message handler that logs measures and command results.
//!
//! Stands in for the agent's NGSI pipeline: every message is classified
//! by its topic and reported through `tracing`, and per-kind counters are
//! kept so the host can report throughput.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use iota_amqp_binding::MessageHandler;
use iota_protocol::topics::{self, MessageKind};

/// Snapshot of what the handler has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub measures: u64,
    pub command_results: u64,
    pub unrecognized: u64,
}

#[derive(Debug, Default)]
pub struct LoggingMessageHandler {
    measures: AtomicU64,
    command_results: AtomicU64,
    unrecognized: AtomicU64,
}

impl LoggingMessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            measures: self.measures.load(Ordering::Relaxed),
            command_results: self.command_results.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MessageHandler for LoggingMessageHandler {
    async fn handle(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
        let Some(key) = topics::parse_topic(topic) else {
            self.unrecognized.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(topic, "ignoring message on unrecognized topic");
            return Ok(());
        };

        match &key.kind {
            MessageKind::Attributes(path) => {
                self.measures.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    api_key = %key.api_key,
                    device_id = %key.device_id,
                    attribute = %path.join("/"),
                    payload,
                    "measure received"
                );
            }
            MessageKind::CommandExe => {
                self.command_results.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    api_key = %key.api_key,
                    device_id = %key.device_id,
                    payload,
                    "command result received"
                );
            }
            // Our own outbound commands are never bound to an agent queue.
            MessageKind::Command => {
                self.unrecognized.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic, "ignoring command echo");
            }
        }

        Ok(())
    }
}
