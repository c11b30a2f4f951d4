//! Command pipeline: turns one command-execution request into one
//! broker publish per command attribute.
//!
//! The API key is resolved once for the device's service. Each attribute
//! is then encoded, routed to `.{api_key}.{device_id}.cmd` and published
//! independently; all attributes run concurrently and the request fails
//! with the first error (in attribute order) once every publish was
//! attempted. Publishes that already went out stay out.

use futures::future::join_all;

use iota_protocol::topics::RoutingKey;
use iota_protocol::{CommandAttribute, Device};

use crate::channel::BrokerChannel;
use crate::error::{BindingError, BindingResult};
use crate::interface::{ApiKeyResolver, PayloadCodec};
use crate::supervisor::BrokerSession;

/// Everything needed to publish one command attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPublishJob {
    pub api_key: String,
    pub device_id: String,
    pub command: String,
    pub payload: String,
    pub routing_key: RoutingKey,
}

impl CommandPublishJob {
    pub fn build(
        api_key: &str,
        device: &Device,
        attribute: &CommandAttribute,
        codec: &dyn PayloadCodec,
    ) -> BindingResult<Self> {
        let payload = codec
            .command_payload(device, &attribute.name, &attribute.value)
            .map_err(|e| BindingError::Codec {
                device_id: device.id.clone(),
                command: attribute.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            api_key: api_key.to_string(),
            device_id: device.id.clone(),
            command: attribute.name.clone(),
            payload,
            routing_key: RoutingKey::command(api_key, &device.id),
        })
    }
}

/// Publish every attribute of a command to its device.
pub async fn execute<Ch: BrokerChannel>(
    session: &BrokerSession<Ch>,
    resolver: &dyn ApiKeyResolver,
    codec: &dyn PayloadCodec,
    device: &Device,
    attributes: &[CommandAttribute],
) -> BindingResult<()> {
    tracing::debug!(
        device_id = %device.id,
        commands = attributes.len(),
        "handling AMQP command"
    );

    let api_key = resolver
        .effective_api_key(&device.service, &device.subservice)
        .await
        .map_err(|e| BindingError::ApiKeyResolution {
            service: device.service.clone(),
            subservice: device.subservice.clone(),
            reason: e.to_string(),
        })?;

    let publishes = attributes
        .iter()
        .map(|attribute| publish_attribute(session, codec, &api_key, device, attribute));

    let outcome = join_all(publishes)
        .await
        .into_iter()
        .collect::<BindingResult<Vec<()>>>()
        .map(|_| ());

    if let Err(e) = &outcome {
        tracing::warn!(
            device_id = %device.id,
            api_key = %api_key,
            error = %e,
            "command execution failed"
        );
    }
    outcome
}

async fn publish_attribute<Ch: BrokerChannel>(
    session: &BrokerSession<Ch>,
    codec: &dyn PayloadCodec,
    api_key: &str,
    device: &Device,
    attribute: &CommandAttribute,
) -> BindingResult<()> {
    let job = CommandPublishJob::build(api_key, device, attribute, codec)?;
    let routing_key = job.routing_key.to_string();

    if job.routing_key.has_ambiguous_segments() {
        tracing::warn!(
            device_id = %job.device_id,
            api_key = %job.api_key,
            routing_key = %routing_key,
            "routing key segment contains a delimiter or wildcard, the device may not receive it"
        );
    }

    tracing::debug!(
        device_id = %job.device_id,
        api_key = %job.api_key,
        routing_key = %routing_key,
        payload = %job.payload,
        "sending command execution to device"
    );

    let exchange = session.exchange();
    let channel = session.channel();

    // Re-asserted on every publish; another agent may own the declaration.
    channel
        .declare_exchange(&exchange.exchange, exchange.options)
        .await?;
    channel
        .publish(&exchange.exchange, &routing_key, job.payload.as_bytes())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::AmqpConfig;
    use crate::mock::{
        FailPoint, MockApiKeyResolver, MockChannel, MockCodec, MockConnector, RecordingHandler,
    };
    use crate::supervisor;

    async fn session() -> (BrokerSession<MockChannel>, MockChannel) {
        let connector = MockConnector::new();
        let session = supervisor::establish(
            &connector,
            &AmqpConfig::new("amqp://rabbitmq"),
            Arc::new(RecordingHandler::new()),
        )
        .await
        .unwrap();
        let mock = connector.channel();
        mock.reset();
        (session, mock)
    }

    fn resolver() -> MockApiKeyResolver {
        MockApiKeyResolver::new().with_key("s1", "sub1", "KEY1")
    }

    fn device() -> Device {
        Device::new("d1", "s1", "sub1")
    }

    #[test]
    fn job_carries_routing_context() {
        let attr = CommandAttribute::new("ping", json!([]));
        let job = CommandPublishJob::build("KEY1", &device(), &attr, &MockCodec::new()).unwrap();
        assert_eq!(job.routing_key.to_string(), ".KEY1.d1.cmd");
        assert_eq!(job.payload, "d1@ping|[]");
        assert_eq!(job.command, "ping");
        assert_eq!(job.api_key, "KEY1");
    }

    #[test]
    fn job_wraps_codec_errors() {
        let attr = CommandAttribute::new("reboot", json!(null));
        let codec = MockCodec::failing_on("reboot");
        let err = CommandPublishJob::build("KEY1", &device(), &attr, &codec).unwrap_err();
        match err {
            BindingError::Codec { device_id, command, .. } => {
                assert_eq!(device_id, "d1");
                assert_eq!(command, "reboot");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn single_command_publishes_once() {
        let (session, mock) = session().await;
        let codec = MockCodec::new();
        let attrs = vec![CommandAttribute::new("ping", json!([]))];

        execute(&session, &resolver(), &codec, &device(), &attrs)
            .await
            .unwrap();

        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "iota");
        assert_eq!(published[0].routing_key, ".KEY1.d1.cmd");
        let expected = codec.command_payload(&device(), "ping", &json!([])).unwrap();
        assert_eq!(published[0].payload_str(), expected);
    }

    #[tokio::test]
    async fn one_publish_per_attribute() {
        let (session, mock) = session().await;
        let attrs = vec![
            CommandAttribute::new("ping", json!([])),
            CommandAttribute::new("set", json!({"speed": 3})),
            CommandAttribute::new("reset", json!("now")),
        ];

        execute(&session, &resolver(), &MockCodec::new(), &device(), &attrs)
            .await
            .unwrap();

        let published = mock.published();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|m| m.routing_key == ".KEY1.d1.cmd"));
        let mut payloads: Vec<&str> = published.iter().map(|m| m.payload_str()).collect();
        payloads.sort();
        payloads.dedup();
        assert_eq!(payloads.len(), 3);
    }

    #[tokio::test]
    async fn exchange_is_asserted_before_each_publish() {
        let (session, mock) = session().await;
        let attrs = vec![
            CommandAttribute::new("a", json!(1)),
            CommandAttribute::new("b", json!(2)),
        ];

        execute(&session, &resolver(), &MockCodec::new(), &device(), &attrs)
            .await
            .unwrap();

        let exchanges = mock.declared_exchanges();
        assert_eq!(exchanges.len(), 2);
        assert!(exchanges.iter().all(|(name, _)| name == "iota"));
    }

    #[tokio::test]
    async fn unresolved_api_key_publishes_nothing() {
        let (session, mock) = session().await;
        let stranger = Device::new("d9", "unknown", "/");
        let attrs = vec![CommandAttribute::new("ping", json!([]))];

        let err = execute(&session, &resolver(), &MockCodec::new(), &stranger, &attrs)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BindingError::ApiKeyResolution { ref service, .. } if service == "unknown"
        ));
        assert!(mock.published().is_empty());
        assert!(mock.declared_exchanges().is_empty());
    }

    #[tokio::test]
    async fn codec_failure_keeps_sibling_publishes() {
        let (session, mock) = session().await;
        let attrs = vec![
            CommandAttribute::new("ping", json!([])),
            CommandAttribute::new("reboot", json!(null)),
            CommandAttribute::new("status", json!([])),
        ];

        let err = execute(
            &session,
            &resolver(),
            &MockCodec::failing_on("reboot"),
            &device(),
            &attrs,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BindingError::Codec { ref command, .. } if command == "reboot"));
        assert_eq!(mock.published().len(), 2);
    }

    #[tokio::test]
    async fn publish_failure_fails_command() {
        let (session, mock) = session().await;
        mock.fail_at(FailPoint::Publish);
        let attrs = vec![CommandAttribute::new("ping", json!([]))];

        let err = execute(&session, &resolver(), &MockCodec::new(), &device(), &attrs)
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::Publish { .. }));
    }

    #[tokio::test]
    async fn empty_command_resolves_key_only() {
        let (session, mock) = session().await;
        let resolver = resolver();

        execute(&session, &resolver, &MockCodec::new(), &device(), &[])
            .await
            .unwrap();
        assert_eq!(resolver.calls(), 1);
        assert!(mock.published().is_empty());
    }
}
