//! Mutex-guarded publisher handle
//!
//! The sender's publisher is the only broker handle touched from two tasks:
//! the send loop publishes through it while a stop request may close it. All
//! access paths go through this one guard so that "close from stop" and
//! "publish from send loop" never interleave. A close that lands between two
//! publishes is observed as an empty slot on the next iteration, not as a
//! fault.

use crate::broker::{BrokerError, SentMessage, TopicPublisher};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared, lock-protected optional publisher handle.
#[derive(Clone, Default)]
pub struct PublisherGuard {
    slot: Arc<Mutex<Option<Box<dyn TopicPublisher>>>>,
}

impl PublisherGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly created publisher, closing any previous one first.
    pub async fn install(&self, publisher: Box<dyn TopicPublisher>) {
        let mut slot = self.slot.lock().await;
        if let Some(mut previous) = slot.replace(publisher) {
            previous.close().await;
        }
    }

    /// Publish one message through the guarded handle.
    ///
    /// Returns `None` when the handle has been closed by a concurrent stop
    /// request; the caller exits cleanly instead of treating this as an
    /// error.
    pub async fn publish(&self, text: &str) -> Option<Result<SentMessage, BrokerError>> {
        let mut slot = self.slot.lock().await;
        let publisher = slot.as_mut()?;
        Some(publisher.publish(text).await)
    }

    /// Close and clear the handle. Safe to call any number of times; the
    /// underlying publisher is closed at most once.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut publisher) = slot.take() {
            publisher.close().await;
        }
    }

    pub async fn is_installed(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}
