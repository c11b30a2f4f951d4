//! E2E tests for device → agent traffic through both consumed queues.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::TestHarness;
use iota_agent::LoggingMessageHandler;
use iota_agent::handler::HandlerStats;

/// A measure published by a device reaches the handler with `/` separators.
#[tokio::test]
async fn e2e_measure_topic_is_normalized() {
    let h = TestHarness::started().await;

    h.device_sends("iotaqueue", ".KEY1.d1.attrs.temperature", "23.5");

    let received = h.wait_for_messages(1).await;
    assert_eq!(
        received,
        vec![("/KEY1/d1/attrs/temperature".to_string(), "23.5".to_string())]
    );
}

/// Command results arrive through the `_commands` queue.
#[tokio::test]
async fn e2e_command_result_is_forwarded() {
    let h = TestHarness::started().await;

    h.device_sends("iotaqueue_commands", ".KEY1.d1.cmdexe", "d1@ping|pong");

    let received = h.wait_for_messages(1).await;
    assert_eq!(received[0].0, "/KEY1/d1/cmdexe");
    assert_eq!(received[0].1, "d1@ping|pong");
}

/// Deliveries on one queue are handled in broker order.
#[tokio::test]
async fn e2e_measures_keep_order() {
    let h = TestHarness::started().await;

    for i in 0..5 {
        h.device_sends("iotaqueue", ".KEY1.d1.attrs", &format!("t|{i}"));
    }

    let payloads: Vec<String> = h
        .wait_for_messages(5)
        .await
        .into_iter()
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(payloads, vec!["t|0", "t|1", "t|2", "t|3", "t|4"]);
}

/// A failing message does not stop the listener.
#[tokio::test]
async fn e2e_handler_failure_is_isolated() {
    let h = TestHarness::started().await;
    h.handler.fail_on("garbage");

    h.device_sends("iotaqueue", ".KEY1.d1.attrs", "garbage");
    h.device_sends("iotaqueue", ".KEY1.d1.attrs", "t|20");

    let received = h.wait_for_messages(2).await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].1, "t|20");
}

/// After stop, queues are no longer consumed.
#[tokio::test]
async fn e2e_stop_ends_consumption() {
    let mut h = TestHarness::started().await;
    h.binding.stop().await;

    assert!(!h.broker.deliver("iotaqueue", ".KEY1.d1.attrs", b"t|1"));
    assert!(h.handler.received().is_empty());
}

/// The agent's logging handler classifies what the listeners deliver.
#[tokio::test]
async fn e2e_logging_handler_counts_traffic() {
    let handler = Arc::new(LoggingMessageHandler::new());
    let mut h = TestHarness::with_handler(handler.clone());
    h.binding.start().await.unwrap();

    h.device_sends("iotaqueue", ".KEY1.d1.attrs", "t|20");
    h.device_sends("iotaqueue", ".KEY1.d1.attrs.humidity", "40");
    h.device_sends("iotaqueue_commands", ".KEY1.d1.cmdexe", "d1@ping|pong");

    let expected = HandlerStats {
        measures: 2,
        command_results: 1,
        unrecognized: 0,
    };
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handler.stats() != expected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(handler.stats(), expected);
    h.binding.stop().await;
}
