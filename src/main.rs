//! Roverlink - Entry Point
//!
//! CLI application for driving a vehicle over a resilient control link.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use roverlink::control::ControlPublisher;
use roverlink::transport::connector_for;
use roverlink::{Config, ConnectionManager, LinkSubscriber, VERSION};

/// Roverlink - resilient remote-control link
#[derive(Parser)]
#[command(name = "roverlink")]
#[command(version = VERSION)]
#[command(about = "Resilient control link to a remote vehicle")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the operator console
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "roverlink.toml")]
        config: PathBuf,
    },
    /// Open the configured transport once and report reachability
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "roverlink.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_link(config).await,
        Commands::Check { config } => check(config).await,
    }
}

fn load(config_path: &Path) -> Result<Config> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    roverlink::util::init_tracing(&config.logging)?;
    Ok(config)
}

async fn run_link(config_path: PathBuf) -> Result<()> {
    let config = load(&config_path)?;
    let endpoint = config.endpoint();

    info!(
        version = VERSION,
        config_path = ?config_path,
        %endpoint,
        transport = %config.link.transport,
        "Starting Roverlink"
    );

    let link = Arc::new(ConnectionManager::new(config.link_config(), ConsoleSubscriber));

    if config.metrics.enabled {
        let _metrics_task =
            roverlink::metrics::init_metrics(&config.metrics, link.metrics(), link.subscribe_state())?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let mut publisher = ControlPublisher::spawn(
        link.clone(),
        config.cadence(),
        config.control.include_timestamp,
    );

    link.start(endpoint).await;

    let stdin = BufReader::new(tokio::io::stdin());
    let wait_for_signal = tokio::select! {
        result = console(stdin, &link, &publisher) => match result {
            Ok(ConsoleExit::Quit) => false,
            Ok(ConsoleExit::EndOfInput) => {
                info!("Console input closed, running until shutdown signal");
                true
            }
            Err(e) => {
                error!(error = %e, "Console error, running until shutdown signal");
                true
            }
        },
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            false
        }
    };
    if wait_for_signal {
        shutdown_signal().await;
        info!("Shutdown signal received");
    }

    publisher.stop();
    link.stop().await;

    info!("Roverlink stopped");
    Ok(())
}

async fn check(config_path: PathBuf) -> Result<()> {
    let config = load(&config_path)?;
    let endpoint = config.endpoint();
    let link_config = config.link_config();
    let connector = connector_for(&link_config);

    info!(%endpoint, transport = %connector.kind(), "Checking vehicle reachability");

    let opened = tokio::time::timeout(link_config.connect_timeout, connector.open(&endpoint))
        .await
        .with_context(|| format!("Timed out after {:?}", link_config.connect_timeout))?;

    match opened {
        Ok((mut sink, _source)) => {
            sink.close().await;
            info!(%endpoint, "Vehicle reachable");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Vehicle unreachable");
            Err(e.into())
        }
    }
}

/// Prints link events for the operator
struct ConsoleSubscriber;

impl LinkSubscriber for ConsoleSubscriber {
    fn on_status_changed(&mut self, status: &str) -> Result<()> {
        println!("[link] {}", status);
        Ok(())
    }

    fn on_message_received(&mut self, message: &str) -> Result<()> {
        println!("<< {}", message);
        Ok(())
    }
}

/// One operator console line
#[derive(Debug, PartialEq)]
enum Command {
    Arm,
    Disarm,
    Throttle(i64),
    Joystick(f64, f64),
    Release,
    Reconnect,
    Status,
    Send(String),
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match word {
            "" => return Ok(None),
            "arm" => Self::Arm,
            "disarm" => Self::Disarm,
            "throttle" => Self::Throttle(rest.parse().context("usage: throttle <0-100>")?),
            "joy" => {
                let (x, y) = rest.split_once(' ').context("usage: joy <x> <y>")?;
                Self::Joystick(
                    x.trim().parse().context("invalid x axis")?,
                    y.trim().parse().context("invalid y axis")?,
                )
            }
            "release" => Self::Release,
            "reconnect" => Self::Reconnect,
            "status" => Self::Status,
            "send" if !rest.is_empty() => Self::Send(rest.to_string()),
            "send" => anyhow::bail!("usage: send <text>"),
            "quit" | "exit" => Self::Quit,
            other => anyhow::bail!("unknown command: {}", other),
        };
        Ok(Some(command))
    }
}

/// How the operator console finished
#[derive(Debug, PartialEq)]
enum ConsoleExit {
    Quit,
    EndOfInput,
}

/// Read operator commands until `quit` or end of input
async fn console(
    input: impl AsyncBufRead + Unpin,
    link: &ConnectionManager,
    publisher: &ControlPublisher,
) -> Result<ConsoleExit> {
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read console input")? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{:#}", e);
                continue;
            }
        };

        match command {
            Command::Arm => publisher.set_armed(true).await,
            Command::Disarm => publisher.set_armed(false).await,
            Command::Throttle(value) => publisher.set_throttle(value).await,
            Command::Joystick(x, y) => publisher.set_joystick(x, y).await,
            Command::Release => publisher.release_joystick().await,
            Command::Reconnect => link.reconnect().await,
            Command::Status => {
                let snapshot = link.metrics().snapshot();
                println!(
                    "state={} queued={} next_retry={:?} sent={} received={}",
                    link.state(),
                    link.queued().await,
                    link.next_retry_delay().await,
                    snapshot.messages_sent + snapshot.messages_flushed,
                    snapshot.messages_received,
                );
                println!("control={:?}", publisher.snapshot());
            }
            Command::Send(text) => {
                if let Err(e) = link.send(text).await {
                    warn!(error = %e, "Send rejected");
                }
            }
            Command::Quit => return Ok(ConsoleExit::Quit),
        }
    }

    Ok(ConsoleExit::EndOfInput)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
