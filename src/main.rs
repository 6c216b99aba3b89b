//! mqtt-adapter command line entry point

use clap::{Parser, Subcommand};
use mqtt_adapter::config::{AdapterConfig, ConfigError};
use mqtt_adapter::lifecycle_span;
use mqtt_adapter::observability::init_default_logging;
use mqtt_adapter::transport::mqtt::{matches, MqttClient, MqttError, TopicFilter};
use mqtt_adapter::{AdapterError, AdapterResult};
use std::io;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn, Instrument};

/// Client-side MQTT adapter with presence announcement and topic routing
#[derive(Parser)]
#[command(name = "mqtt-adapter")]
#[command(about = "Connect to an MQTT broker and route messages by topic filter")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_ADAPTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe to the configured filters and log every message
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Check whether a topic filter matches a topic
    Match { filter: String, topic: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging() {
        eprintln!("{e}");
    }

    let result = match cli.command {
        Commands::Match { filter, topic } => match handle_match_command(&filter, &topic) {
            Ok(true) => Ok(()),
            Ok(false) => process::exit(1),
            Err(e) => Err(e),
        },
        Commands::Run => match load_configuration(&cli.config) {
            Ok(config) => run_adapter(config).await,
            Err(e) => Err(e),
        },
        Commands::Config { show } => load_configuration(&cli.config)
            .and_then(|config| handle_config_command(&config, show)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(e.exit_code());
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> AdapterResult<AdapterConfig> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => {
            // Try default locations
            let default_paths = ["mqtt-adapter.toml", "config/mqtt-adapter.toml"];
            default_paths
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
                .ok_or_else(|| {
                    ConfigError::FileRead(io::Error::new(
                        io::ErrorKind::NotFound,
                        "No configuration file found. Provide one with -c/--config",
                    ))
                })?
        }
    };

    info!("Loading configuration from: {}", path.display());
    Ok(AdapterConfig::load_from_file(&path)?)
}

async fn run_adapter(config: AdapterConfig) -> AdapterResult<()> {
    let span = lifecycle_span!(server = %config.mqtt.server, port = config.mqtt.port);

    async move {
        let client: MqttClient = MqttClient::default();

        for filter in &config.subscriptions {
            client
                .subscribe(filter, |topic: &str, payload: &[u8]| {
                    info!(
                        topic,
                        bytes = payload.len(),
                        payload = %String::from_utf8_lossy(payload),
                        "Message received"
                    );
                })
                .await?;
        }
        client.on_connect(|| info!("Adapter online"));

        client.begin(config.mqtt.clone()).await?;

        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        info!("Adapter is running, waiting for messages...");
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }

        if let Some(last_error) = client.last_error() {
            warn!(error = %last_error, "Last MQTT error before shutdown");
        }
        client.end().await?;
        info!("Application shutdown complete");
        Ok::<(), AdapterError>(())
    }
    .instrument(span)
    .await
}

fn handle_config_command(config: &AdapterConfig, show: bool) -> AdapterResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::InvalidConfig(format!("Cannot render configuration: {e}"))
        })?;
        println!("Current configuration:");
        println!("{rendered}");
    }
    println!("Configuration is valid");
    Ok(())
}

/// Returns whether `filter` matches `topic`
fn handle_match_command(filter: &str, topic: &str) -> AdapterResult<bool> {
    TopicFilter::parse(filter).map_err(MqttError::InvalidFilter)?;

    let matched = matches(filter, topic);
    println!("{}", if matched { "match" } else { "no match" });
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_command_reports_result_without_exiting() {
        assert!(handle_match_command("sport/+/player1", "sport/tennis/player1").unwrap());
        assert!(!handle_match_command("sport/+", "sport/tennis/player1").unwrap());
    }

    #[test]
    fn test_match_command_invalid_filter_is_mqtt_error() {
        let error = handle_match_command("sport/#/ranking", "sport/x/ranking").unwrap_err();
        assert!(matches!(
            error,
            AdapterError::Mqtt(MqttError::InvalidFilter(_))
        ));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_missing_configuration_is_config_error() {
        let missing = PathBuf::from("/nonexistent/mqtt-adapter.toml");
        let error = load_configuration(&Some(missing)).unwrap_err();
        assert_eq!(error.exit_code(), 2);
    }
}
