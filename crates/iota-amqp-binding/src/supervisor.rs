//! Connection supervisor: opens the broker channel, declares the
//! exchange/queue topology and starts the queue listeners.
//!
//! Setup is a strict sequence; the first failing step aborts it:
//! 1. open connection + channel
//! 2. declare topic exchange
//! 3. declare `{queue}` and `{queue}_commands`
//! 4. bind them with the measures and command-result patterns
//! 5. consume both (auto-ack) and spawn one listener per queue
//!
//! Step 1 and steps 2–5 are each bounded by the configured timeout. The
//! connector closes a half-open connection itself; if anything fails after
//! the channel opened, the channel is closed before the error is returned,
//! so a failed setup never leaves a session behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use iota_protocol::topics;

use crate::channel::{BrokerChannel, Connector};
use crate::config::{AmqpConfig, ExchangeConfig};
use crate::error::{BindingError, BindingResult};
use crate::handler;
use crate::interface::MessageHandler;

/// The live broker channel plus everything started on it.
///
/// Owning a session is the proof that setup completed; publishing and
/// consuming only happen through one.
pub struct BrokerSession<Ch: BrokerChannel> {
    channel: Ch,
    exchange: ExchangeConfig,
    listeners: Vec<JoinHandle<()>>,
}

impl<Ch: BrokerChannel> BrokerSession<Ch> {
    pub fn channel(&self) -> &Ch {
        &self.channel
    }

    pub fn exchange(&self) -> &ExchangeConfig {
        &self.exchange
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Close the channel and stop the listeners. Close errors are logged.
    pub async fn close(self) {
        if let Err(e) = self.channel.close().await {
            tracing::warn!(error = %e, "failed to close AMQP channel");
        }
        for listener in self.listeners {
            listener.abort();
        }
        tracing::debug!(exchange = %self.exchange.exchange, "AMQP session closed");
    }
}

/// Connect, declare the topology and start consuming.
pub async fn establish<C: Connector>(
    connector: &C,
    config: &AmqpConfig,
    handler: Arc<dyn MessageHandler>,
) -> BindingResult<BrokerSession<C::Channel>> {
    let exchange = config.exchange_config();
    let timeout = config.connect_timeout();

    let channel = connector.open(&config.uri, timeout).await?;

    let setup = async {
        declare_topology(&channel, &exchange).await?;
        start_listeners(&channel, &exchange, handler).await
    };

    match bounded(timeout, setup).await {
        Ok(listeners) => {
            tracing::info!(
                exchange = %exchange.exchange,
                queue = %exchange.queue,
                "AMQP topology ready, consuming"
            );
            Ok(BrokerSession {
                channel,
                exchange,
                listeners,
            })
        }
        Err(e) => {
            if let Err(close_err) = channel.close().await {
                tracing::warn!(
                    error = %close_err,
                    "failed to close AMQP channel after setup error"
                );
            }
            Err(e)
        }
    }
}

async fn declare_topology<Ch: BrokerChannel>(
    channel: &Ch,
    exchange: &ExchangeConfig,
) -> BindingResult<()> {
    let commands_queue = topics::commands_queue(&exchange.queue);

    channel
        .declare_exchange(&exchange.exchange, exchange.options)
        .await?;
    channel.declare_queue(&exchange.queue).await?;
    channel.declare_queue(&commands_queue).await?;
    channel
        .bind_queue(&exchange.queue, &exchange.exchange, topics::TELEMETRY_BINDING)
        .await?;
    channel
        .bind_queue(&commands_queue, &exchange.exchange, topics::COMMAND_EXE_BINDING)
        .await?;

    Ok(())
}

async fn start_listeners<Ch: BrokerChannel>(
    channel: &Ch,
    exchange: &ExchangeConfig,
    handler: Arc<dyn MessageHandler>,
) -> BindingResult<Vec<JoinHandle<()>>> {
    let commands_queue = topics::commands_queue(&exchange.queue);

    // Both consumers must exist before either listener is spawned.
    let measures = channel.consume(&exchange.queue).await?;
    let results = channel.consume(&commands_queue).await?;

    Ok(vec![
        handler::spawn(exchange.queue.clone(), measures, handler.clone()),
        handler::spawn(commands_queue, results, handler),
    ])
}

async fn bounded<T>(
    timeout: Duration,
    step: impl Future<Output = BindingResult<T>>,
) -> BindingResult<T> {
    tokio::time::timeout(timeout, step)
        .await
        .unwrap_or_else(|_| Err(BindingError::timeout(timeout)))
}
