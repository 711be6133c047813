//! Durable receiver loop behavior
//!
//! Exercises the three-tier receive algorithm against the scriptable fake
//! broker: exactly-once acknowledgment, recover-and-redeliver on message
//! faults, reconnect on transport faults, and duplicate-client-id retry.

mod common;

use common::{test_config, wait_until};
use durasub::broker::BrokerError;
use durasub::host::{self, Mode};
use durasub::testing::FakeBroker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

fn start_receiver(broker: &FakeBroker, receive_ms: u64, error_ms: u64) -> durasub::LoopHandle {
    host::start(
        Arc::new(broker.clone()),
        Arc::new(test_config(receive_ms, error_ms)),
        Mode::Receive,
    )
}

#[tokio::test]
async fn acknowledges_each_message_exactly_once() {
    let broker = FakeBroker::new();
    for i in 0..3 {
        broker.enqueue_message(format!("message {i}"));
    }

    let handle = start_receiver(&broker, 10, 10);

    let drained = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(2), move || broker.acked().len() == 3).await
    };
    assert!(drained, "expected all 3 messages acknowledged");

    handle.stop().await;

    assert_eq!(broker.acked(), vec!["ID:1", "ID:2", "ID:3"]);
    assert_eq!(broker.recover_calls(), 0);
    assert_eq!(broker.queued_len(), 0);
    assert_eq!(broker.unacked_len(), 0);
}

#[tokio::test]
async fn failed_handling_recovers_and_redelivers_the_same_message() {
    let broker = FakeBroker::new();
    broker.enqueue_message("good-1");
    broker.enqueue_message("poison");
    broker.enqueue_message("good-2");
    broker.fail_ack_once_for("poison");

    let handle = start_receiver(&broker, 10, 10);

    let drained = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(2), move || broker.acked().len() == 3).await
    };
    assert!(drained, "expected all messages acknowledged after redelivery");

    handle.stop().await;

    // The poison message was recovered once and acknowledged exactly once
    // on redelivery; no reconnect happened.
    assert_eq!(broker.recover_calls(), 1);
    assert_eq!(broker.acked(), vec!["ID:1", "ID:2", "ID:3"]);
    assert_eq!(broker.connects(), 1);
}

#[tokio::test]
async fn duplicate_client_id_retries_after_error_interval() {
    let broker = FakeBroker::new();
    broker.fail_next_connect(BrokerError::DuplicateClientId("test-client".to_string()));
    broker.enqueue_message("after the collision");

    let started = Instant::now();
    let handle = start_receiver(&broker, 10, 50);

    let acked = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(2), move || !broker.acked().is_empty()).await
    };
    assert!(acked, "collision must not be fatal");
    assert!(
        started.elapsed() >= Duration::from_millis(50),
        "retry must wait the error interval"
    );

    handle.stop().await;

    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(broker.connects(), 1);
}

#[tokio::test]
async fn transport_error_without_message_in_hand_reconnects() {
    let broker = FakeBroker::new();
    broker.fail_next_receive();
    broker.enqueue_message("survives the outage");

    let handle = start_receiver(&broker, 10, 10);

    let acked = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(2), move || !broker.acked().is_empty()).await
    };
    assert!(acked, "message must be received after reconnection");

    handle.stop().await;

    // Disconnect then connect, never recover.
    assert!(broker.disconnects() >= 1);
    assert_eq!(broker.connects(), 2);
    assert_eq!(broker.recover_calls(), 0);
}

#[tokio::test]
async fn stop_is_observed_within_one_poll_interval() {
    let broker = FakeBroker::new();
    let handle = start_receiver(&broker, 50, 50);

    let connected = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(1), move || broker.connects() == 1).await
    };
    assert!(connected);

    timeout(Duration::from_millis(500), handle.stop())
        .await
        .expect("stop must complete within one poll interval");

    assert_eq!(broker.disconnects(), 1);
}
