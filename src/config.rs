//! Configuration for the topic client
//!
//! Settings are loaded once from a TOML file and passed immutably into loop
//! construction; the core never reads global state. Credentials are not kept
//! in the file itself: the file names environment variables which are
//! resolved at connect time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    pub topic: TopicSection,
}

/// Broker endpoint and credential indirection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port (e.g. `mqtt://localhost:1883`)
    pub provider_url: String,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
}

/// Topic, durable subscription identity, and loop intervals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSection {
    /// Topic to publish to / subscribe from
    pub name: String,
    /// Durable subscription name; `(client_id, subscriber_name)` identifies
    /// the subscription cluster-wide
    pub subscriber_name: String,
    /// Cluster-unique client identifier required to own the durable
    /// subscription
    pub client_id: String,
    /// Sleep between drain cycles when no messages are available, in ms
    #[serde(default = "default_receive_attempt_interval_ms")]
    pub receive_attempt_interval_ms: u64,
    /// Sleep before retrying after a connection-level failure, in ms
    #[serde(default = "default_error_attempt_interval_ms")]
    pub error_attempt_interval_ms: u64,
}

fn default_receive_attempt_interval_ms() -> u64 {
    5000
}

fn default_error_attempt_interval_ms() -> u64 {
    15000
}

/// Per-invocation options for the bounded sender loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub text: String,
    /// Number of messages to send; at least 1
    pub count: u32,
    /// Delay between consecutive messages; zero means no delay
    pub delay_between_messages: Duration,
}

impl SendOptions {
    pub fn new(text: impl Into<String>, count: u32, delay_between_messages: Duration) -> Self {
        Self {
            text: text.into(),
            count: count.max(1),
            delay_between_messages,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.provider_url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.provider_url must not be empty".to_string(),
            ));
        }
        if self.topic.name.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "topic.name must not be empty".to_string(),
            ));
        }
        if self.topic.client_id.is_empty() || self.topic.subscriber_name.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "topic.client_id and topic.subscriber_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Sleep between drain cycles when the subscription is empty.
    pub fn receive_attempt_interval(&self) -> Duration {
        Duration::from_millis(self.topic.receive_attempt_interval_ms)
    }

    /// Sleep before retrying after a connection-level failure.
    pub fn error_attempt_interval(&self) -> Duration {
        Duration::from_millis(self.topic.error_attempt_interval_ms)
    }

    /// Broker username resolved from the configured environment variable.
    pub fn username(&self) -> Option<String> {
        resolve_env(self.broker.username_env.as_ref())
    }

    /// Broker password resolved from the configured environment variable.
    pub fn password(&self) -> Option<String> {
        resolve_env(self.broker.password_env.as_ref())
    }
}

fn resolve_env(env_var_name: Option<&String>) -> Option<String> {
    let name = env_var_name?;
    match std::env::var(name) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("credential variable '{name}' is not set; connecting without it");
            None
        }
    }
}
