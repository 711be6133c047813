//! durasub - command-line entry point
//!
//! `durasub send` publishes a bounded stream of messages; `durasub receive`
//! consumes the durable subscription until interrupted.

use clap::{Parser, Subcommand};
use durasub::broker::mqtt::MqttBroker;
use durasub::config::{ClientConfig, SendOptions};
use durasub::host::{self, Mode};
use durasub::logging::init_default_logging;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Resilient publish/subscribe topic client
#[derive(Parser)]
#[command(name = "durasub")]
#[command(about = "Resilient publish/subscribe topic client with durable subscriptions")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish messages to the configured topic
    Send {
        /// The message text to send
        #[arg(short, long)]
        message: String,

        /// The number of messages to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// The delay between messages, in milliseconds
        #[arg(short, long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// Consume messages from the durable topic subscription
    Receive,
}

#[tokio::main]
async fn main() {
    init_default_logging();

    let cli = Cli::parse();

    let config = match load_configuration(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let mode = match cli.command {
        Commands::Send {
            message,
            count,
            delay_ms,
        } => Mode::Send(SendOptions::new(
            message,
            count,
            Duration::from_millis(delay_ms),
        )),
        Commands::Receive => Mode::Receive,
    };

    let broker = Arc::new(MqttBroker::new());
    let mut handle = host::start(broker, config, mode);

    enum Exit {
        Interrupted,
        Finished,
    }

    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => Exit::Interrupted,
        _ = handle.wait() => Exit::Finished,
    };

    match exit {
        Exit::Interrupted => {
            info!("interrupt received, shutting down");
            handle.stop().await;
        }
        Exit::Finished => {}
    }

    info!("shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<ClientConfig, durasub::ConfigError> {
    if let Some(path) = config_path {
        info!("loading configuration from {}", path.display());
        return ClientConfig::load_from_file(path);
    }

    for path_str in ["durasub.toml", "config/durasub.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("loading configuration from {}", path.display());
            return ClientConfig::load_from_file(&path);
        }
    }

    Err(durasub::ConfigError::InvalidConfig(
        "no configuration file found; provide one with -c/--config or create durasub.toml"
            .to_string(),
    ))
}
