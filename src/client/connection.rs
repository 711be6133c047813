//! Connection/session lifecycle management
//!
//! Opens and closes connection+session pairs and classifies connect-time
//! failures. Both loops own at most one [`LiveSession`] at a time; a new
//! connect attempt is always preceded by disconnecting the prior session.

use crate::broker::{
    Broker, BrokerError, BrokerMessage, ConnectOptions, TopicPublisher, TopicSubscriber,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use std::sync::Arc;
use tracing::debug;

/// One live connection plus its session, with an optionally attached durable
/// subscriber. Never shared across loops.
pub struct LiveSession {
    session: Box<dyn crate::broker::BrokerSession>,
    subscriber: Option<Box<dyn TopicSubscriber>>,
}

impl LiveSession {
    /// Attach to the durable subscription for `(topic, subscription)`.
    pub async fn attach_durable_subscriber(
        &mut self,
        topic: &str,
        subscription: &str,
    ) -> ClientResult<()> {
        let subscriber = self
            .session
            .create_durable_subscriber(topic, subscription)
            .await
            .map_err(ClientError::from_broker)?;
        self.subscriber = Some(subscriber);
        debug!("subscriber created");
        Ok(())
    }

    /// Create a publisher bound to `topic` on this session.
    pub async fn create_publisher(
        &mut self,
        topic: &str,
    ) -> ClientResult<Box<dyn TopicPublisher>> {
        let publisher = self
            .session
            .create_publisher(topic)
            .await
            .map_err(ClientError::from_broker)?;
        debug!("publisher created");
        Ok(publisher)
    }

    /// Non-blocking receive on the attached subscriber.
    pub async fn receive_no_wait(&mut self) -> Result<Option<Box<dyn BrokerMessage>>, BrokerError> {
        match self.subscriber.as_mut() {
            Some(subscriber) => subscriber.receive_no_wait().await,
            None => Err(BrokerError::Closed),
        }
    }

    /// Force broker redelivery of unacknowledged messages.
    pub async fn recover(&mut self) -> Result<(), BrokerError> {
        self.session.recover().await
    }
}

/// Opens and closes sessions against a broker, binding the configured client
/// identifier when asked to.
pub struct ConnectionManager<B: Broker> {
    broker: Arc<B>,
    config: Arc<ClientConfig>,
}

impl<B: Broker> ConnectionManager<B> {
    pub fn new(broker: Arc<B>, config: Arc<ClientConfig>) -> Self {
        Self { broker, config }
    }

    /// Open a connection, start it, and open one session in
    /// client-acknowledge mode.
    ///
    /// With `use_client_id`, the connection is tagged with the configured
    /// client identifier; a second concurrent instance using the same
    /// identifier fails with [`ClientError::DuplicateClientId`].
    pub async fn connect(&self, use_client_id: bool) -> ClientResult<LiveSession> {
        let options = ConnectOptions {
            provider_url: self.config.broker.provider_url.clone(),
            client_id: use_client_id.then(|| self.config.topic.client_id.clone()),
            username: self.config.username(),
            password: self.config.password(),
        };

        let session = self
            .broker
            .connect(options)
            .await
            .map_err(ClientError::from_broker)?;
        debug!("connected");

        Ok(LiveSession {
            session,
            subscriber: None,
        })
    }

    /// Best-effort teardown: closes the subscriber if attached, then the
    /// session and connection. Idempotent; safe to call with no live
    /// session, and a failed close never prevents a retry.
    pub async fn disconnect(&self, session: &mut Option<LiveSession>) {
        let Some(mut live) = session.take() else {
            return;
        };

        if let Some(mut subscriber) = live.subscriber.take() {
            subscriber.close().await;
        }
        live.session.close().await;
        debug!("disconnected");
    }
}
