//! palrcon - An RCON Client for Palworld Servers
//!
//! This is the command-line entry point. It registers every `--server`,
//! runs one admin command against the selected target and prints each
//! server's result.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use palrcon::config::{ConnectionConfig, ServerConfig};
use palrcon::connection::ConnectionHooks;
use palrcon::registry::{FanOut, Registry, Target};
use palrcon::watcher::{PlayerWatcher, WatcherConfig};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Palworld RCON client
#[derive(Parser, Debug)]
#[command(name = "palrcon")]
#[command(version, about = "Administer Palworld servers over RCON")]
struct Args {
    /// Server to administer, as `password@host[:port]` (repeatable)
    #[arg(short, long = "server", required = true)]
    servers: Vec<ServerConfig>,

    /// Which server to run against: `all` or a `host:port`
    #[arg(short, long, default_value = "all", global = true)]
    target: Target,

    /// Seconds to wait before reconnecting a dropped connection
    #[arg(long, default_value_t = 5.0)]
    reconnect_delay: f64,

    /// Seconds to wait for a response (0 waits forever)
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// Reconnect attempts before giving up on queued commands
    #[arg(long)]
    max_retries: Option<u32>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send raw command text
    Exec {
        /// The command and its arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// List online players
    Players,

    /// Show server info
    Info,

    /// Send a message to everyone in-game
    Broadcast {
        /// The message (spaces are sent as underscores)
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// Save the world
    Save,

    /// Shut the server down after a delay
    Shutdown {
        /// Seconds before shutdown
        seconds: String,

        /// Message shown to players
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// Kick a player by Steam ID
    Kick {
        steam_id: String,
    },

    /// Ban a player by Steam ID
    Ban {
        steam_id: String,
    },

    /// Check that each server accepts the password
    Check,

    /// Announce joins and leaves until Ctrl+C
    Watch {
        /// Seconds between player list polls
        #[arg(long, default_value_t = 5.0)]
        interval: f64,

        /// Only log changes, do not broadcast them
        #[arg(long)]
        quiet: bool,
    },
}

impl Args {
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        Ok(ConnectionConfig {
            reconnect_delay: seconds("--reconnect-delay", self.reconnect_delay)?,
            max_reconnect_attempts: self.max_retries,
            request_timeout: match seconds("--timeout", self.timeout)? {
                d if d.is_zero() => None,
                d => Some(d),
            },
            ..ConnectionConfig::default()
        })
    }
}

fn seconds(flag: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid value for {}", flag))
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "palrcon=info",
        1 => "palrcon=debug",
        _ => "palrcon=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints each server's result and fails if any server failed.
fn report(results: FanOut<String>) -> anyhow::Result<()> {
    let total = results.len();
    let failed = results.failures().count();

    for outcome in results {
        match outcome.result {
            Ok(text) => {
                println!("[{}]", outcome.address);
                let text = text.trim_end_matches(['\0', '\n', '\r']);
                if !text.is_empty() {
                    println!("{}", text);
                }
            }
            Err(e) => println!("[{}] error: {}", outcome.address, e),
        }
    }

    if failed > 0 {
        bail!("{} of {} servers failed", failed, total);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.connection_config()?;
    let hooks = ConnectionHooks::new()
        .on_disconnect(|address| info!(server = %address, "Disconnected"))
        .on_transport_error(|address, e| warn!(server = %address, error = %e, "Transport error"));
    let registry = Registry::new(config, hooks);

    for server in &args.servers {
        registry.register(server.clone())?;
    }

    let target = &args.target;
    let result = match &args.command {
        Commands::Exec { command } => report(registry.send(target, &command.join(" ")).await?),
        Commands::Players => report(registry.show_players(target).await?),
        Commands::Info => report(registry.info(target).await?),
        Commands::Broadcast { message } => {
            report(registry.broadcast(target, &message.join(" ")).await?)
        }
        Commands::Save => report(registry.save(target).await?),
        Commands::Shutdown { seconds, message } => report(
            registry
                .shutdown_server(target, seconds, &message.join(" "))
                .await?,
        ),
        Commands::Kick { steam_id } => report(registry.kick(target, steam_id).await?),
        Commands::Ban { steam_id } => report(registry.ban(target, steam_id).await?),
        Commands::Check => {
            let results = registry.check_connection(target).await?;
            let total = results.len();
            let mut failed = 0;
            for outcome in results {
                if matches!(outcome.result, Ok(true)) {
                    println!("[{}] ok", outcome.address);
                } else {
                    failed += 1;
                    println!("[{}] unreachable or wrong password", outcome.address);
                }
            }
            if failed > 0 {
                Err(anyhow::anyhow!("{} of {} servers failed", failed, total))
            } else {
                Ok(())
            }
        }
        Commands::Watch { interval, quiet } => {
            let watcher_config = WatcherConfig {
                interval: seconds("--interval", *interval)?,
                announce: !quiet,
            };
            let watchers: Vec<PlayerWatcher> = registry
                .resolve(target)?
                .into_iter()
                .map(|conn| PlayerWatcher::start(conn, watcher_config.clone()))
                .collect();

            signal::ctrl_c()
                .await
                .context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping watchers...");
            drop(watchers);
            Ok(())
        }
    };

    registry.shutdown().await;
    result
}
