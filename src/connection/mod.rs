//! Connection Module
//!
//! This module manages the link to a single game server. Each server gets
//! its own driver task, so commands to different servers never wait on
//! each other.
//!
//! ## Architecture
//!
//! ```text
//!  caller tasks                       driver task (one per server)
//! ┌──────────────┐   mpsc request   ┌──────────────────────────────────┐
//! │ Connection   │─────────────────>│  ┌───────────┐   ┌────────────┐  │
//! │ (handle)     │                  │  │ Command   │──>│ Socket     │  │
//! │              │<─────────────────│  │ queue     │   │ + decoder  │  │
//! └──────────────┘  oneshot reply   │  └───────────┘   └────────────┘  │
//!                                   │        ▲               │         │
//!                                   │        └── handshake ──┘         │
//!                                   └──────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Lazy connect**: The first command opens and authenticates the socket
//! - **Queueing**: Commands wait in FIFO order while the session is not ready
//! - **Reconnect**: A dropped socket with queued work reconnects after a delay
//! - **Statistics**: Tracks connection and command metrics
//!
//! ## Example
//!
//! ```ignore
//! use palrcon::config::{ConnectionConfig, ServerConfig};
//! use palrcon::connection::{Connection, ConnectionHooks};
//!
//! let server = ServerConfig::new("127.0.0.1", 25575, "admin-password");
//! let conn = Connection::new(server, ConnectionConfig::default(), ConnectionHooks::new());
//!
//! let players = conn.execute("ShowPlayers").await?;
//! ```

pub mod handler;
pub mod handshake;

// Re-export commonly used types
pub use handler::{
    AuthState, Connection, ConnectionError, ConnectionHooks, ConnectionId, ConnectionStats,
    ConnectionStatus, SocketState,
};
pub use handshake::{check_auth_reply, AuthReply};
