//! durasub - resilient publish/subscribe topic client
//!
//! Publishes a bounded stream of text messages to a topic and/or consumes a
//! durable topic subscription, surviving broker restarts, duplicate-instance
//! collisions, and per-message processing failures.
//!
//! # Overview
//!
//! - [`client`]: the connection/session lifecycle core - reconnect loops,
//!   the three-tier durable receiver, the bounded sender, and the guarded
//!   publisher handle that makes concurrent stop requests safe
//! - [`broker`]: the abstract broker client contract plus an MQTT binding
//!   over rumqttc
//! - [`host`]: start/stop glue that runs one loop on a background task
//! - [`config`]: TOML settings with environment-variable credential
//!   indirection
//!
//! # Quick Start
//!
//! ```no_run
//! use durasub::broker::mqtt::MqttBroker;
//! use durasub::config::{ClientConfig, SendOptions};
//! use durasub::host::{self, Mode};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(ClientConfig::load_from_file(Path::new("durasub.toml"))?);
//! let broker = Arc::new(MqttBroker::new());
//!
//! let options = SendOptions::new("hello", 5, Duration::from_millis(50));
//! let mut handle = host::start(broker, config, Mode::Send(options));
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod testing;

pub use client::{BoundedSenderLoop, ConnectionManager, DurableReceiverLoop, PublisherGuard};
pub use config::{ClientConfig, ConfigError, SendOptions};
pub use error::{ClientError, ClientResult};
pub use host::{start, LoopHandle, Mode};
