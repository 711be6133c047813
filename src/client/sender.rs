//! Bounded sender loop
//!
//! Publishes a counted stream of text messages with an optional delay
//! between them. The outer retry tier mirrors the receiver's: on any
//! mid-send fault the session is torn down and rebuilt after the error
//! interval. The send counter is never reset across reconnects, so
//! already-sent messages are not resent.

use crate::broker::Broker;
use crate::client::connection::{ConnectionManager, LiveSession};
use crate::client::guard::PublisherGuard;
use crate::client::log_message;
use crate::config::{ClientConfig, SendOptions};
use crate::error::{ClientError, ClientResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Outcome of one pass over the inner send tier.
enum SendOutcome {
    /// All requested messages have been sent
    Completed,
    /// The publisher handle was closed by a concurrent stop request
    HandleClosed,
}

/// Sends `options.count` messages to the topic, then terminates so the
/// hosting context can stop the process.
pub struct BoundedSenderLoop<B: Broker> {
    connections: ConnectionManager<B>,
    config: Arc<ClientConfig>,
    options: SendOptions,
    publisher: PublisherGuard,
    stop: watch::Receiver<bool>,
}

impl<B: Broker> BoundedSenderLoop<B> {
    pub fn new(
        broker: Arc<B>,
        config: Arc<ClientConfig>,
        options: SendOptions,
        publisher: PublisherGuard,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connections: ConnectionManager::new(broker, config.clone()),
            config,
            options,
            publisher,
            stop,
        }
    }

    /// Run until the requested count is reached or a stop request closes
    /// the publisher handle. Returns the number of messages sent.
    pub async fn run(mut self) -> u32 {
        let mut sent: u32 = 0;
        let mut live: Option<LiveSession> = None;

        while sent < self.options.count && !self.stopped() {
            if let Err(e) = self.connect(&mut live).await {
                error!("an error just happened: {e}");
                self.teardown(&mut live).await;
                info!("sending will be resumed");
                self.sleep_interruptible(self.config.error_attempt_interval())
                    .await;
                continue;
            }

            debug!("attempting to send messages");

            match self.send_tier(&mut sent).await {
                Ok(SendOutcome::Completed) => break,
                Ok(SendOutcome::HandleClosed) => break,
                Err(e) => {
                    error!("an error just happened: {e}");
                    self.teardown(&mut live).await;
                    info!("sending will be resumed");
                    self.sleep_interruptible(self.config.error_attempt_interval())
                        .await;
                }
            }
        }

        self.publisher.close().await;
        self.connections.disconnect(&mut live).await;
        info!("sender finished after {sent} message(s)");
        sent
    }

    /// Connect without a client identifier and install a fresh publisher in
    /// the guard.
    async fn connect(&mut self, live: &mut Option<LiveSession>) -> ClientResult<()> {
        self.teardown(live).await;

        // The session goes into the slot first, so a publisher-creation
        // failure still tears it down on the error path.
        *live = Some(self.connections.connect(false).await?);
        if let Some(session) = live.as_mut() {
            let publisher = session.create_publisher(&self.config.topic.name).await?;
            self.publisher.install(publisher).await;
        }
        Ok(())
    }

    /// Inner tier: publish until the count is reached, observing the
    /// guarded handle on every iteration.
    async fn send_tier(&mut self, sent: &mut u32) -> ClientResult<SendOutcome> {
        while *sent < self.options.count {
            // A stop request that landed during connect() finds the guard
            // re-populated, so the slot alone cannot carry cancellation
            // here.
            if self.stopped() {
                return Ok(SendOutcome::HandleClosed);
            }

            match self.publisher.publish(&self.options.text).await {
                // Handle gone: a stop request closed it between iterations.
                None => return Ok(SendOutcome::HandleClosed),
                Some(Err(e)) => return Err(ClientError::from_broker(e)),
                Some(Ok(receipt)) => {
                    *sent += 1;
                    log_message(
                        "Message sent: ",
                        &receipt.id,
                        Some(&receipt.text),
                        receipt.timestamp,
                    );

                    let delay = self.options.delay_between_messages;
                    if !delay.is_zero() && *sent < self.options.count {
                        self.sleep_interruptible(delay).await;
                        if self.stopped() {
                            return Ok(SendOutcome::HandleClosed);
                        }
                    }
                }
            }
        }

        Ok(SendOutcome::Completed)
    }

    /// Close the guarded publisher, then the session. The guard serializes
    /// the close against an in-flight publish.
    async fn teardown(&mut self, live: &mut Option<LiveSession>) {
        self.publisher.close().await;
        self.connections.disconnect(live).await;
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn sleep_interruptible(&mut self, duration: Duration) {
        let mut stop = self.stop.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop.wait_for(|stopped| *stopped) => {}
        }
    }
}
