//! Loop hosting
//!
//! Thin glue between the process and the core loops: starts exactly one
//! loop on a background task and requests graceful stop. Stop is observed
//! by the loop within one poll, error, or delay interval; for the sender it
//! additionally closes the guarded publisher handle so an in-flight send
//! loop exits cleanly on its next iteration.

use crate::broker::Broker;
use crate::client::{BoundedSenderLoop, DurableReceiverLoop, PublisherGuard};
use crate::config::{ClientConfig, SendOptions};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Which loop to run.
#[derive(Debug, Clone)]
pub enum Mode {
    Send(SendOptions),
    Receive,
}

/// Handle to a running loop.
pub struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    publisher: PublisherGuard,
    task: JoinHandle<()>,
}

/// Start the selected loop on a background task; returns immediately.
pub fn start<B: Broker>(broker: Arc<B>, config: Arc<ClientConfig>, mode: Mode) -> LoopHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let publisher = PublisherGuard::new();

    let task = match mode {
        Mode::Receive => {
            info!("receiver is starting");
            tokio::spawn(DurableReceiverLoop::new(broker, config, stop_rx).run())
        }
        Mode::Send(options) => {
            info!("sender is starting");
            let guard = publisher.clone();
            tokio::spawn(async move {
                BoundedSenderLoop::new(broker, config, options, guard, stop_rx)
                    .run()
                    .await;
            })
        }
    };

    LoopHandle {
        stop_tx,
        publisher,
        task,
    }
}

impl LoopHandle {
    /// Request graceful stop and wait for the loop to finish. Safe to call
    /// concurrently with an in-progress send: the publisher handle is
    /// closed at most once, serialized against the send loop's own use of
    /// it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.publisher.close().await;
        let _ = self.task.await;
        info!("loop stopped");
    }

    /// Wait for the loop to terminate on its own (the sender reaching its
    /// count). The receiver never terminates on its own.
    pub async fn wait(&mut self) {
        let _ = (&mut self.task).await;
    }
}
