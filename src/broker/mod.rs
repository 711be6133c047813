//! Broker client contract
//!
//! The core loops depend on the broker through these object-safe async
//! traits. A concrete binding over rumqttc lives in [`mqtt`]; tests use the
//! scriptable fake in `crate::testing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod mqtt;

/// Errors reported by a broker client implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The configured client identifier is already bound to another
    /// connection somewhere in the cluster.
    #[error("client identifier '{0}' is already in use")]
    DuplicateClientId(String),

    #[error("broker URL is invalid: {0}")]
    InvalidUrl(String),

    #[error("transport failure: {0}")]
    Transport(String),

    /// The handle was closed and can no longer be used.
    #[error("broker handle is closed")]
    Closed,
}

/// Connection parameters resolved from settings by the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub provider_url: String,
    /// When present, the connection is bound to this cluster-unique
    /// identifier; required to own a durable subscription.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Receipt for a published message, used for logging only.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Entry point of a broker client library.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open and start a connection, then open one session on it in
    /// client-acknowledge mode.
    async fn connect(&self, options: ConnectOptions) -> Result<Box<dyn BrokerSession>, BrokerError>;
}

/// One connection plus one session, owned together.
#[async_trait]
pub trait BrokerSession: Send {
    /// Attach to the durable subscription `(client id, subscription)` on the
    /// given topic.
    async fn create_durable_subscriber(
        &mut self,
        topic: &str,
        subscription: &str,
    ) -> Result<Box<dyn TopicSubscriber>, BrokerError>;

    async fn create_publisher(&mut self, topic: &str)
        -> Result<Box<dyn TopicPublisher>, BrokerError>;

    /// Discard unacknowledged messages from local buffering and mark them
    /// for redelivery.
    async fn recover(&mut self) -> Result<(), BrokerError>;

    /// Close session and connection. Best-effort; must not fail.
    async fn close(&mut self);
}

#[async_trait]
pub trait TopicSubscriber: Send {
    /// Non-blocking receive. `Ok(None)` means no message is currently
    /// available.
    async fn receive_no_wait(&mut self) -> Result<Option<Box<dyn BrokerMessage>>, BrokerError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait TopicPublisher: Send {
    async fn publish(&mut self, text: &str) -> Result<SentMessage, BrokerError>;

    async fn close(&mut self);
}

/// A message pulled from a subscription under client-acknowledge mode. The
/// core never mutates its content; it only acknowledges or logs it.
#[async_trait]
pub trait BrokerMessage: Send {
    fn id(&self) -> &str;

    fn text(&self) -> Option<&str>;

    fn timestamp(&self) -> DateTime<Utc>;

    /// Acknowledge receipt, preventing broker redelivery.
    async fn acknowledge(&mut self) -> Result<(), BrokerError>;
}
