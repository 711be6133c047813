//! Durable receiver loop
//!
//! Drives the three-tier receive algorithm over a durable subscription:
//! reconnect, poll, drain-until-empty. Every message pulled under
//! client-acknowledge mode is either acknowledged or the session is
//! recovered before the next pull.
//!
//! The central classification rule: a fault with a message in hand is
//! message-scoped and resolved with `recover()`; a fault with no message in
//! hand is connection-fatal and restarts the reconnect tier. This keeps a
//! broken transport from looping in recovery while still protecting the
//! subscription from individual bad messages.

use crate::broker::{Broker, BrokerMessage};
use crate::client::connection::{ConnectionManager, LiveSession};
use crate::client::log_message;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Receiver state machine. The loop has no terminal state while running; it
/// exits only when the stop signal is observed between drain cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    /// (Re)establish connection and durable subscription
    Reconnect,
    /// Sleep one receive interval, then drain again
    Poll,
    /// Pull messages until the subscription is empty
    Drain,
}

/// Consumes a durable topic subscription forever, surviving broker restarts
/// and duplicate-instance collisions.
pub struct DurableReceiverLoop<B: Broker> {
    connections: ConnectionManager<B>,
    config: Arc<ClientConfig>,
    stop: watch::Receiver<bool>,
}

impl<B: Broker> DurableReceiverLoop<B> {
    pub fn new(broker: Arc<B>, config: Arc<ClientConfig>, stop: watch::Receiver<bool>) -> Self {
        Self {
            connections: ConnectionManager::new(broker, config.clone()),
            config,
            stop,
        }
    }

    /// Run until the stop signal is observed. All failures are retried
    /// indefinitely; there is no fatal condition.
    pub async fn run(mut self) {
        let mut live: Option<LiveSession> = None;
        let mut state = ReceiverState::Reconnect;

        loop {
            // Cancellation is observed between drain cycles, not mid-drain.
            if self.stopped() {
                break;
            }

            state = match state {
                ReceiverState::Reconnect => self.reconnect(&mut live).await,
                ReceiverState::Poll => self.poll().await,
                ReceiverState::Drain => self.drain_tier(&mut live).await,
            };
        }

        self.connections.disconnect(&mut live).await;
        info!("receiver stopped");
    }

    /// Outer tier: connect with the client identifier and attach to the
    /// durable subscription.
    async fn reconnect(&mut self, live: &mut Option<LiveSession>) -> ReceiverState {
        match self.connect_and_subscribe(live).await {
            Ok(()) => ReceiverState::Drain,
            Err(ClientError::DuplicateClientId(_)) => {
                // Expected when another instance already owns the
                // subscription; no session was opened, so nothing to tear
                // down.
                warn!(
                    "another instance using the same client identifier is already running; \
                     another connection attempt will be made"
                );
                self.sleep_interruptible(self.config.error_attempt_interval())
                    .await;
                ReceiverState::Reconnect
            }
            Err(e) => {
                error!("an error just happened: {e}");
                self.connections.disconnect(live).await;
                info!("receiving will be resumed");
                self.sleep_interruptible(self.config.error_attempt_interval())
                    .await;
                ReceiverState::Reconnect
            }
        }
    }

    async fn connect_and_subscribe(&mut self, live: &mut Option<LiveSession>) -> ClientResult<()> {
        self.connections.disconnect(live).await;

        // The session goes into the slot before the subscription is
        // attached, so a subscribe failure still tears it down on the
        // error path.
        *live = Some(self.connections.connect(true).await?);
        if let Some(session) = live.as_mut() {
            session
                .attach_durable_subscriber(
                    &self.config.topic.name,
                    &self.config.topic.subscriber_name,
                )
                .await?;
        }
        Ok(())
    }

    /// Middle tier: one stop-aware sleep between drain cycles.
    async fn poll(&mut self) -> ReceiverState {
        self.sleep_interruptible(self.config.receive_attempt_interval())
            .await;
        ReceiverState::Drain
    }

    /// Inner tier wrapper: a drain error is connection-fatal by definition
    /// (message-scoped faults are resolved inside the drain).
    async fn drain_tier(&mut self, live: &mut Option<LiveSession>) -> ReceiverState {
        let Some(session) = live.as_mut() else {
            return ReceiverState::Reconnect;
        };

        match self.drain(session).await {
            Ok(()) => ReceiverState::Poll,
            Err(e) => {
                error!("an error just happened: {e}");
                self.connections.disconnect(live).await;
                info!("receiving will be resumed");
                self.sleep_interruptible(self.config.error_attempt_interval())
                    .await;
                ReceiverState::Reconnect
            }
        }
    }

    /// Inner tier: receive until the subscription reports empty.
    async fn drain(&self, session: &mut LiveSession) -> ClientResult<()> {
        loop {
            debug!("checking for new messages");

            // No message in hand yet: a fault here propagates to the
            // reconnect tier.
            let message = session
                .receive_no_wait()
                .await
                .map_err(ClientError::from_broker)?;

            let Some(mut message) = message else {
                return Ok(());
            };

            log_message(
                "Message received: ",
                message.id(),
                message.text(),
                message.timestamp(),
            );

            if let Err(e) = self.handle(message.as_mut()).await {
                // Message-scoped fault: force redelivery and keep draining.
                let message_id = message.id().to_string();
                error!("{e}");
                session
                    .recover()
                    .await
                    .map_err(ClientError::from_broker)?;
                info!("message {message_id} will be redelivered");
            }
        }
    }

    /// Process one received message. Acknowledging is the final step; a
    /// fault anywhere in here is message-scoped because the message is in
    /// hand.
    async fn handle(&self, message: &mut dyn BrokerMessage) -> ClientResult<()> {
        let message_id = message.id().to_string();
        message
            .acknowledge()
            .await
            .map_err(|e| ClientError::handling(message_id, e))
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep that wakes early when the stop signal flips, bounding shutdown
    /// latency by one poll or error interval.
    async fn sleep_interruptible(&mut self, duration: Duration) {
        let mut stop = self.stop.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop.wait_for(|stopped| *stopped) => {}
        }
    }
}
