//! Shared helpers for loop integration tests

use durasub::config::{BrokerSection, ClientConfig, TopicSection};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Config with test-sized intervals so loops retry quickly.
pub fn test_config(receive_ms: u64, error_ms: u64) -> ClientConfig {
    ClientConfig {
        broker: BrokerSection {
            provider_url: "fake://broker".to_string(),
            username_env: None,
            password_env: None,
        },
        topic: TopicSection {
            name: "sample.topic".to_string(),
            subscriber_name: "sample-subscription".to_string(),
            client_id: "test-client".to_string(),
            receive_attempt_interval_ms: receive_ms,
            error_attempt_interval_ms: error_ms,
        },
    }
}

/// Poll `predicate` until it holds or `deadline` elapses.
pub async fn wait_until<F: FnMut() -> bool>(deadline: Duration, mut predicate: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
