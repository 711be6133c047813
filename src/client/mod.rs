//! Client loop core
//!
//! The connection/session lifecycle shared by the sender and the durable
//! receiver: reconnect-with-backoff, durable subscription establishment, the
//! three-tier receive loop, the acknowledge/recover decision, and the
//! guarded publisher handle that lets a running send loop be cancelled from
//! another task.

use chrono::{DateTime, Utc};
use tracing::{debug, enabled, info, Level};

pub mod connection;
pub mod guard;
pub mod receiver;
pub mod sender;

pub use connection::{ConnectionManager, LiveSession};
pub use guard::PublisherGuard;
pub use receiver::DurableReceiverLoop;
pub use sender::BoundedSenderLoop;

/// Log a message body the same way for both loops: a pretty-printed JSON
/// rendition at debug level, just the header otherwise.
pub(crate) fn log_message(
    header: &str,
    id: &str,
    text: Option<&str>,
    timestamp: DateTime<Utc>,
) {
    if enabled!(Level::DEBUG) {
        let body = serde_json::json!({
            "message_id": id,
            "text": text.unwrap_or("not available"),
            "timestamp": timestamp.to_rfc3339(),
        });
        let rendered = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
        debug!("{header}{rendered}");
        return;
    }

    info!("{header}{id}");
}
