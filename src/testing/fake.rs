//! Scriptable in-memory broker
//!
//! Implements the broker contract over shared in-memory state. Tests
//! enqueue messages, inject connect/receive/publish/acknowledge faults, and
//! observe connects, disconnects, acknowledgments, recovers, and published
//! messages. Redelivery-after-recover is simulated: unacknowledged messages
//! go back to the front of the queue with their original identifiers.

use crate::broker::{
    Broker, BrokerError, BrokerMessage, BrokerSession, ConnectOptions, SentMessage,
    TopicPublisher, TopicSubscriber,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct QueuedMessage {
    id: String,
    text: String,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct FakeState {
    // scripted behavior
    queue: VecDeque<QueuedMessage>,
    unacked: Vec<QueuedMessage>,
    connect_errors: VecDeque<BrokerError>,
    connect_delay: Duration,
    receive_faults: u32,
    publish_fail_calls: HashSet<u32>,
    fail_ack_texts: HashSet<String>,
    bound_client_ids: HashSet<String>,
    next_message_seq: u32,
    publish_calls: u32,

    // observed behavior
    connect_attempts: u32,
    connects: u32,
    disconnects: u32,
    recover_calls: u32,
    acked: Vec<String>,
    published: Vec<String>,
    publisher_closes: u32,
    subscriber_closes: u32,
}

/// In-memory broker double. Clones share state, so a test keeps one handle
/// while the loop under test owns another.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake broker state poisoned")
    }

    /// Queue a message for delivery to the next subscriber.
    pub fn enqueue_message(&self, text: impl Into<String>) {
        let mut state = self.lock();
        state.next_message_seq += 1;
        let message = QueuedMessage {
            id: format!("ID:{}", state.next_message_seq),
            text: text.into(),
            timestamp: Utc::now(),
        };
        state.queue.push_back(message);
    }

    /// Make the next connect attempt fail with the given error.
    pub fn fail_next_connect(&self, error: BrokerError) {
        self.lock().connect_errors.push_back(error);
    }

    /// Make every connect attempt take this long to complete. Lets a test
    /// land a stop request while a connect is still in flight.
    pub fn delay_connects(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Make the next receive attempt fail with a transport error.
    pub fn fail_next_receive(&self) {
        self.lock().receive_faults += 1;
    }

    /// Make the nth publish call (1-based, counted across reconnects) fail.
    pub fn fail_publish_call(&self, call: u32) {
        self.lock().publish_fail_calls.insert(call);
    }

    /// Make acknowledging the next message with this text fail, once.
    pub fn fail_ack_once_for(&self, text: impl Into<String>) {
        self.lock().fail_ack_texts.insert(text.into());
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.lock().disconnects
    }

    pub fn recover_calls(&self) -> u32 {
        self.lock().recover_calls
    }

    /// Identifiers of acknowledged messages, in acknowledgment order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// Texts of published messages, in publish order.
    pub fn published(&self) -> Vec<String> {
        self.lock().published.clone()
    }

    pub fn publisher_closes(&self) -> u32 {
        self.lock().publisher_closes
    }

    pub fn subscriber_closes(&self) -> u32 {
        self.lock().subscriber_closes
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.lock().unacked.len()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn connect(&self, options: ConnectOptions) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let delay = {
            let mut state = self.lock();
            state.connect_attempts += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.connect_errors.pop_front() {
            return Err(error);
        }

        if let Some(client_id) = &options.client_id {
            if !state.bound_client_ids.insert(client_id.clone()) {
                return Err(BrokerError::DuplicateClientId(client_id.clone()));
            }
        }

        state.connects += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            client_id: options.client_id,
            closed: false,
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    client_id: Option<String>,
    closed: bool,
}

#[async_trait]
impl BrokerSession for FakeSession {
    async fn create_durable_subscriber(
        &mut self,
        _topic: &str,
        _subscription: &str,
    ) -> Result<Box<dyn TopicSubscriber>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        Ok(Box::new(FakeSubscriber {
            state: self.state.clone(),
        }))
    }

    async fn create_publisher(
        &mut self,
        _topic: &str,
    ) -> Result<Box<dyn TopicPublisher>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        Ok(Box::new(FakePublisher {
            state: self.state.clone(),
        }))
    }

    async fn recover(&mut self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("fake broker state poisoned");
        state.recover_calls += 1;
        let unacked = std::mem::take(&mut state.unacked);
        for message in unacked.into_iter().rev() {
            state.queue.push_front(message);
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.state.lock().expect("fake broker state poisoned");
        state.disconnects += 1;
        if let Some(client_id) = &self.client_id {
            state.bound_client_ids.remove(client_id);
        }
    }
}

struct FakeSubscriber {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl TopicSubscriber for FakeSubscriber {
    async fn receive_no_wait(&mut self) -> Result<Option<Box<dyn BrokerMessage>>, BrokerError> {
        let mut state = self.state.lock().expect("fake broker state poisoned");

        if state.receive_faults > 0 {
            state.receive_faults -= 1;
            return Err(BrokerError::Transport("injected receive fault".to_string()));
        }

        let Some(message) = state.queue.pop_front() else {
            return Ok(None);
        };
        state.unacked.push(message.clone());

        Ok(Some(Box::new(FakeMessage {
            state: self.state.clone(),
            message,
        })))
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().expect("fake broker state poisoned");
        state.subscriber_closes += 1;
    }
}

struct FakePublisher {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl TopicPublisher for FakePublisher {
    async fn publish(&mut self, text: &str) -> Result<SentMessage, BrokerError> {
        let mut state = self.state.lock().expect("fake broker state poisoned");
        state.publish_calls += 1;
        let call = state.publish_calls;

        if state.publish_fail_calls.remove(&call) {
            return Err(BrokerError::Transport(format!(
                "injected publish fault on call {call}"
            )));
        }

        state.published.push(text.to_string());
        Ok(SentMessage {
            id: format!("ID:sent-{call}"),
            text: text.to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().expect("fake broker state poisoned");
        state.publisher_closes += 1;
    }
}

struct FakeMessage {
    state: Arc<Mutex<FakeState>>,
    message: QueuedMessage,
}

#[async_trait]
impl BrokerMessage for FakeMessage {
    fn id(&self) -> &str {
        &self.message.id
    }

    fn text(&self) -> Option<&str> {
        Some(&self.message.text)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.message.timestamp
    }

    async fn acknowledge(&mut self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("fake broker state poisoned");

        if state.fail_ack_texts.remove(&self.message.text) {
            return Err(BrokerError::Transport("injected ack fault".to_string()));
        }

        let id = self.message.id.clone();
        state.unacked.retain(|m| m.id != id);
        state.acked.push(id);
        Ok(())
    }
}
