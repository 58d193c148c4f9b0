//! Command Module
//!
//! This module turns admin operations into RCON command text and runs them
//! on a connection.
//!
//! ## Architecture
//!
//! ```text
//! Caller (kick, ban, broadcast, ...)
//!       │
//!       ▼
//! ┌─────────────────┐
//! │    Command      │  (this module)
//! │                 │
//! │  - Validate     │  numeric args, before any I/O
//! │  - Escape       │  spaces -> underscores
//! │  - Render       │  wire text
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Connection    │  (connection module)
//! └─────────────────┘
//! ```

pub mod handler;

pub use handler::{dispatch, escape_spaces, Command, CommandError, ValidationError};
