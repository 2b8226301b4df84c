//! iron-pi CLI
//!
//! Talks to the iron-pi driver through the device client: watch events,
//! query detected hardware, drive outputs and LEDs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use iron_pi_config::Config;
use iron_pi_device_client::{
    ClientEvent, DeviceClient, SetLeds, SetOutputs, Subscription,
};
use serde_json::Value;
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "~/.config/iron-pi/client.kdl";

#[derive(Parser, Debug)]
#[command(name = "iron-pi")]
#[command(about = "Command-line client for the iron-pi hardware driver")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Driver socket path (overrides the configuration)
    #[arg(short, long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print driver events until interrupted
    Watch,

    /// Print the hardware detected by the driver
    HardwareInfo {
        /// How long to wait for the driver to report hardware
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Set digital outputs, e.g. '{"outputs":[{"address":1,"levels":[true,false]}]}'
    SetOutputs {
        json: String,

        /// How long to wait for the driver connection
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Set LED patterns, e.g. '{"leds":[{"address":1,"colors":"g","onTime":500,"offTime":500,"idleTime":0}]}'
    SetLeds {
        json: String,

        /// How long to wait for the driver connection
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.socket.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Watch => cmd_watch(&config).await,
        Commands::HardwareInfo { timeout_ms } => cmd_hardware_info(&config, timeout_ms).await,
        Commands::SetOutputs { json, timeout_ms } => {
            cmd_set_outputs(&config, &json, timeout_ms).await
        }
        Commands::SetLeds { json, timeout_ms } => cmd_set_leds(&config, &json, timeout_ms).await,
        Commands::Config => cmd_config(&config),
    };

    result.map_err(|e| miette::miette!("{:#}", e))
}

/// Load the configuration file and apply command-line overrides
///
/// A missing file is only an error when the path was given explicitly.
fn load_config(path: Option<&str>, socket: Option<&str>) -> miette::Result<Config> {
    let explicit = path.is_some();
    let config_path: PathBuf = shellexpand::tilde(path.unwrap_or(DEFAULT_CONFIG_PATH))
        .into_owned()
        .into();

    let mut config = if !explicit && !config_path.exists() {
        Config::default()
    } else {
        iron_pi_config::parse_config(&config_path).map_err(|e| {
            miette::Report::new(e).wrap_err(format!(
                "Failed to load configuration: {}",
                config_path.display()
            ))
        })?
    };

    if let Some(socket) = socket {
        config.client.socket_path = Some(shellexpand::tilde(socket).into_owned().into());
    }

    Ok(config)
}

async fn cmd_watch(config: &Config) -> anyhow::Result<()> {
    let client = DeviceClient::new(config.client.clone());
    let mut events = client.subscribe();
    client.start();

    eprintln!(
        "Watching driver at {} (Ctrl-C to stop)",
        config.client.resolved_socket_path().display()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => println!("{}", describe(&event)?),
                None => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn cmd_hardware_info(config: &Config, timeout_ms: u64) -> anyhow::Result<()> {
    let client = DeviceClient::new(config.client.clone());
    let mut events = client.subscribe();
    client.start();

    let info = wait_for(&mut events, timeout_ms, |event| match event {
        ClientEvent::DevicesDetected(info) => Some(info),
        _ => None,
    })
    .await
    .context("Driver did not report hardware")?;

    client.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_set_outputs(config: &Config, json: &str, timeout_ms: u64) -> anyhow::Result<()> {
    let cmd = SetOutputs::from_value(parse_json(json)?)?;

    let client = connect(config, timeout_ms).await?;
    client.set_outputs(&cmd)?;
    client.shutdown().await;

    println!("Sent outputs for {} device(s)", cmd.outputs.len());
    Ok(())
}

async fn cmd_set_leds(config: &Config, json: &str, timeout_ms: u64) -> anyhow::Result<()> {
    let cmd = SetLeds::from_value(parse_json(json)?)?;

    let client = connect(config, timeout_ms).await?;
    client.set_leds(&cmd)?;
    client.shutdown().await;

    println!("Sent LED patterns for {} device(s)", cmd.leds.len());
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Start a client and wait until it is connected
async fn connect(config: &Config, timeout_ms: u64) -> anyhow::Result<DeviceClient> {
    let client = DeviceClient::new(config.client.clone());
    let mut events = client.subscribe();
    client.start();

    wait_for(&mut events, timeout_ms, |event| match event {
        ClientEvent::Connection => Some(()),
        _ => None,
    })
    .await
    .with_context(|| {
        format!(
            "Could not connect to driver at {}",
            config.client.resolved_socket_path().display()
        )
    })?;

    Ok(client)
}

/// Wait for the first event `pick` accepts
async fn wait_for<T>(
    events: &mut Subscription,
    timeout_ms: u64,
    mut pick: impl FnMut(ClientEvent) -> Option<T>,
) -> anyhow::Result<T> {
    let wait = async {
        while let Some(event) = events.recv().await {
            if let ClientEvent::Error(e) = &event {
                debug!("{}", e);
            }
            if let Some(found) = pick(event) {
                return Ok(found);
            }
        }
        bail!("Client stopped")
    };

    tokio::time::timeout(Duration::from_millis(timeout_ms), wait)
        .await
        .map_err(|_| anyhow!("Timed out after {}ms", timeout_ms))?
}

fn parse_json(input: &str) -> anyhow::Result<Value> {
    serde_json::from_str(input).context("Command argument is not valid JSON")
}

/// One-line rendering of an event for `watch`
fn describe(event: &ClientEvent) -> anyhow::Result<String> {
    let kind = event.kind();
    Ok(match event {
        ClientEvent::DeviceInputStates(states) => {
            format!("{} {}", kind, serde_json::to_string(states)?)
        }
        ClientEvent::DevicesDetected(info) => format!("{} {}", kind, serde_json::to_string(info)?),
        ClientEvent::Error(e) => format!("{} {}", kind, e),
        ClientEvent::Connection | ClientEvent::Close => kind.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use iron_pi_device_client::{ClientError, HardwareInfo, TransportError};
    use std::sync::Arc;

    #[test]
    fn test_cli_parses_global_options_after_subcommand() {
        let cli = Cli::parse_from([
            "iron-pi",
            "set-outputs",
            r#"{"outputs":[]}"#,
            "--socket",
            "/run/driver.sock",
        ]);

        assert_eq!(cli.socket.as_deref(), Some("/run/driver.sock"));
        match cli.command {
            Commands::SetOutputs { json, timeout_ms } => {
                assert_eq!(json, r#"{"outputs":[]}"#);
                assert_eq!(timeout_ms, 5000);
            }
            other => panic!("Expected SetOutputs, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        assert!(load_config(Some("/nonexistent/iron-pi/client.kdl"), None).is_err());
    }

    #[test]
    fn test_socket_override_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("client.kdl");
        std::fs::write(&path, "socket-path \"/from/config.sock\"\n").unwrap();

        let config = load_config(path.to_str(), Some("/from/cli.sock")).unwrap();
        assert_eq!(
            config.client.resolved_socket_path(),
            PathBuf::from("/from/cli.sock")
        );

        let config = load_config(path.to_str(), None).unwrap();
        assert_eq!(
            config.client.resolved_socket_path(),
            PathBuf::from("/from/config.sock")
        );
    }

    #[test]
    fn test_describe_events() {
        assert_eq!(describe(&ClientEvent::Connection).unwrap(), "connection");
        assert_eq!(
            describe(&ClientEvent::DevicesDetected(HardwareInfo::default())).unwrap(),
            r#"devicesDetected {"devices":[]}"#
        );

        let error = ClientError::Socket {
            source: TransportError::NoRuntime,
        };
        let line = describe(&ClientEvent::Error(Arc::new(error))).unwrap();
        assert!(line.starts_with("error IronPiDeviceClient socket error"));
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(parse_json("{outputs").is_err());
        assert!(parse_json(r#"{"outputs":[]}"#).is_ok());
    }
}
