//! Error taxonomy for the client loops
//!
//! The propagation rules in the receiver and sender depend on this
//! classification, not on source error types: duplicate-client-id collisions
//! retry the reconnect tier with a warning, connection errors tear down and
//! retry, and message-handling errors recover the session without
//! reconnecting.

use crate::broker::BrokerError;
use thiserror::Error;

/// Main error type for client loop operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Expected under multi-instance races: another instance already owns
    /// the durable subscription's client identifier.
    #[error("client identifier '{0}' is already bound to another instance")]
    DuplicateClientId(String),

    /// Any transport/auth/broker-unavailable fault at connect, subscribe, or
    /// publish/receive time outside message handling.
    #[error("connection error: {source}")]
    Connection {
        #[source]
        source: BrokerError,
    },

    /// A fault while a message was in hand; recoverable at message
    /// granularity only.
    #[error("failed handling message {message_id}: {source}")]
    MessageHandling {
        message_id: String,
        #[source]
        source: BrokerError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ClientError {
    /// Classify a broker fault raised while no message was in hand.
    pub fn from_broker(source: BrokerError) -> Self {
        match source {
            BrokerError::DuplicateClientId(id) => ClientError::DuplicateClientId(id),
            other => ClientError::Connection { source: other },
        }
    }

    /// Classify a broker fault raised while the identified message was in
    /// hand.
    pub fn handling(message_id: impl Into<String>, source: BrokerError) -> Self {
        ClientError::MessageHandling {
            message_id: message_id.into(),
            source,
        }
    }
}

/// Result type for client loop operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_client_id_is_classified_separately() {
        let err = ClientError::from_broker(BrokerError::DuplicateClientId("c1".into()));
        assert!(matches!(err, ClientError::DuplicateClientId(id) if id == "c1"));
    }

    #[test]
    fn other_broker_faults_classify_as_connection_errors() {
        let err = ClientError::from_broker(BrokerError::Transport("refused".into()));
        assert!(matches!(err, ClientError::Connection { .. }));
    }

    #[test]
    fn handling_errors_carry_the_message_id() {
        let err = ClientError::handling("ID:42", BrokerError::Transport("ack lost".into()));
        match err {
            ClientError::MessageHandling { message_id, .. } => assert_eq!(message_id, "ID:42"),
            other => panic!("unexpected classification: {other}"),
        }
    }

    #[test]
    fn error_display_is_nonempty() {
        let errors = vec![
            ClientError::DuplicateClientId("c1".into()),
            ClientError::from_broker(BrokerError::Closed),
            ClientError::handling("m1", BrokerError::Transport("x".into())),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
