//! RCON Protocol Implementation
//!
//! This module provides the wire format used to talk to the game server.
//!
//! ## Overview
//!
//! RCON is a small, length-prefixed binary protocol. Every frame looks like:
//!
//! ```text
//! ┌──────────┬──────────────┬──────────┬─────────────────┬────────────┐
//! │ size (4) │ request (4)  │ type (4) │ payload (size-10)│ 0x00 0x00  │
//! └──────────┴──────────────┴──────────┴─────────────────┴────────────┘
//! ```
//!
//! All integers are little-endian. `size` counts every byte after itself.
//!
//! ## Modules
//!
//! - `types`: Defines `Packet`, `PacketType` and display sanitation
//! - `parser`: Frame encoder and incremental decoder
//!
//! ## Example
//!
//! ```
//! use palrcon::protocol::{decode, Packet};
//!
//! let frame = Packet::exec(1, "ShowPlayers").encode();
//! let (packet, consumed) = decode(&frame).unwrap().unwrap();
//! assert_eq!(consumed, frame.len());
//! assert_eq!(packet.text(), "ShowPlayers");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode, encode, DecodeResult, FrameDecoder, FrameError, MAX_FRAME_SIZE};
pub use types::{sanitize, Packet, PacketType};
