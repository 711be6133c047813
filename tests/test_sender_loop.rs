//! Bounded sender loop behavior
//!
//! Counted sends, inter-message delay, concurrent stop via the guarded
//! publisher handle, and the never-reset send counter across reconnects.

mod common;

use common::{test_config, wait_until};
use durasub::config::SendOptions;
use durasub::host::{self, Mode};
use durasub::testing::FakeBroker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

fn start_sender(
    broker: &FakeBroker,
    options: SendOptions,
    error_ms: u64,
) -> durasub::LoopHandle {
    host::start(
        Arc::new(broker.clone()),
        Arc::new(test_config(10, error_ms)),
        Mode::Send(options),
    )
}

#[tokio::test]
async fn sends_exactly_count_messages_then_finishes() {
    let broker = FakeBroker::new();
    let options = SendOptions::new("hello", 5, Duration::ZERO);

    let mut handle = start_sender(&broker, options, 10);
    timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("sender must finish on its own");

    assert_eq!(broker.published().len(), 5);
    assert!(broker.published().iter().all(|text| text == "hello"));
    assert_eq!(broker.connects(), 1);
    assert_eq!(broker.publisher_closes(), 1);
    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn delay_is_applied_between_messages_only() {
    let broker = FakeBroker::new();
    let options = SendOptions::new("spaced", 5, Duration::from_millis(50));

    let started = Instant::now();
    let mut handle = start_sender(&broker, options, 10);
    timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("sender must finish on its own");

    // 4 inter-message delays for 5 messages
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(broker.published().len(), 5);
}

#[tokio::test]
async fn concurrent_stop_halts_sending_and_closes_the_publisher_once() {
    let broker = FakeBroker::new();
    let options = SendOptions::new("unbounded-ish", 1000, Duration::from_millis(20));

    let handle = start_sender(&broker, options, 10);

    let publishing = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(1), move || !broker.published().is_empty()).await
    };
    assert!(publishing);

    timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop must return promptly");

    let sent_at_stop = broker.published().len();
    sleep(Duration::from_millis(100)).await;

    // No further publishes after stop, and no double-close of the handle.
    assert_eq!(broker.published().len(), sent_at_stop);
    assert_eq!(broker.publisher_closes(), 1);
    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn stop_during_connect_is_observed_before_any_publish() {
    let broker = FakeBroker::new();
    broker.delay_connects(Duration::from_millis(200));
    let options = SendOptions::new("never", 1000, Duration::ZERO);

    let handle = start_sender(&broker, options, 10);

    let connecting = {
        let broker = broker.clone();
        wait_until(Duration::from_secs(1), move || broker.connect_attempts() == 1).await
    };
    assert!(connecting);

    // The stop lands while connect is still in flight, so it closes an
    // empty guard and a fresh publisher is installed afterwards. The send
    // tier must still notice and exit without publishing the batch.
    timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("stop must not wait for the whole batch");

    assert!(broker.published().is_empty());
    assert_eq!(broker.publisher_closes(), 1);
    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn send_counter_is_not_reset_across_reconnects() {
    let broker = FakeBroker::new();
    // The third publish call fails mid-send, forcing a teardown and retry.
    broker.fail_publish_call(3);
    let options = SendOptions::new("persistent", 5, Duration::ZERO);

    let mut handle = start_sender(&broker, options, 10);
    timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("sender must finish despite the mid-send fault");

    // Exactly 5 messages reach the broker: already-sent ones are not
    // resent after the reconnect.
    assert_eq!(broker.published().len(), 5);
    assert_eq!(broker.connects(), 2);
}
