//! # palrcon - An RCON Client for Palworld Servers
//!
//! palrcon administers one or more Palworld dedicated servers over the
//! Source RCON protocol. It keeps an authenticated session per server,
//! queues commands while a session is being (re)established, and runs admin
//! commands against any subset of the registered servers concurrently.
//!
//! ## Features
//!
//! - **Persistent sessions**: Sockets open lazily and are reused across commands
//! - **Automatic reconnect**: A dropped socket with pending work reconnects after a delay
//! - **Multi-server fan-out**: One call, per-server results, no early abort
//! - **Typed commands**: `Kick`, `Ban`, `Shutdown`, `Broadcast`, ... validated before I/O
//! - **Player watcher**: Announces joins and leaves in-game
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               palrcon                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │  Registry   │───>│  Command    │───>│  Connection (handle)        │  │
//! │  │  (Target)   │    │  (validate) │    │          │ mpsc             │  │
//! │  └─────────────┘    └─────────────┘    │          ▼                  │  │
//! │        ▲                               │  ┌───────────────────────┐  │  │
//! │        │                               │  │ Driver task           │  │  │
//! │  ┌─────┴───────┐                       │  │ queue / handshake /   │  │  │
//! │  │ PlayerWatch │                       │  │ reconnect             │  │  │
//! │  │ (Background │                       │  └───────────┬───────────┘  │  │
//! │  │ Tokio Task) │                       └──────────────┼──────────────┘  │
//! │  └─────────────┘                                      ▼                 │
//! │                                        ┌─────────────────────────────┐  │
//! │                                        │  RCON framing (protocol)    │  │
//! │                                        └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use palrcon::{ConnectionConfig, ConnectionHooks, Registry, Target};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::new(ConnectionConfig::default(), ConnectionHooks::new());
//!     registry.register("admin-password@10.0.0.5:25575".parse()?)?;
//!     registry.register("other-password@10.0.0.6".parse()?)?;
//!
//!     let results = registry.broadcast(&Target::All, "Restart in 5 minutes").await?;
//!     for outcome in results {
//!         println!("{}: {:?}", outcome.address, outcome.result);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `ShowPlayers` / `Info`
//! - `Save`
//! - `Shutdown <seconds> <message>` / `DoExit`
//! - `KickPlayer <steamid>` / `BanPlayer <steamid>`
//! - `Broadcast <message>` (spaces sent as underscores)
//! - Any other text, sent as-is
//!
//! ## Module Overview
//!
//! - [`protocol`]: RCON packet framing
//! - [`connection`]: Per-server session, queue and reconnect
//! - [`commands`]: Typed admin commands and argument validation
//! - [`registry`]: Multi-server targeting and fan-out
//! - [`players`]: `ShowPlayers` parsing and roster diffs
//! - [`watcher`]: Background join/leave announcer
//! - [`config`]: Server and connection settings

pub mod commands;
pub mod config;
pub mod connection;
pub mod players;
pub mod protocol;
pub mod registry;
pub mod watcher;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandError};
pub use config::{ConnectionConfig, ServerConfig, DEFAULT_RCON_PORT};
pub use connection::{Connection, ConnectionError, ConnectionHooks, ConnectionStats};
pub use players::{parse_players, Player};
pub use protocol::{Packet, PacketType};
pub use registry::{FanOut, Outcome, Registry, RegistryError, Target};
pub use watcher::{PlayerWatcher, WatcherConfig};

/// Version of palrcon
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
