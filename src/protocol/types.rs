//! RCON Packet Types
//!
//! This module defines the packet value exchanged with the game server.
//! Every packet carries a request id (echoed back by the server so a
//! response can be matched to its request), a type and a text payload.
//!
//! ## Packet Types
//!
//! | Value | Direction | Meaning                                  |
//! |-------|-----------|------------------------------------------|
//! | `3`   | client    | Authentication request (payload = password) |
//! | `2`   | both      | Execute command / authentication response   |
//! | `0`   | server    | Command response value                      |
//!
//! The `2` value is shared: the client sends commands with it and the
//! server answers the handshake with it.

use bytes::Bytes;
use std::fmt;

/// Bytes occupied by the request id and type fields.
pub const HEADER_LEN: usize = 8;

/// Bytes occupied by the two-byte zero terminator.
pub const TERMINATOR_LEN: usize = 2;

/// Smallest legal value of the `size` field (empty payload).
pub const MIN_FRAME_SIZE: usize = HEADER_LEN + TERMINATOR_LEN;

/// The packet type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// `SERVERDATA_AUTH`, sent by the client with the password.
    Auth,
    /// Sent by the client to run a command, and by the server to answer
    /// an authentication request.
    ExecOrAuthResponse,
    /// `SERVERDATA_RESPONSE_VALUE`, a command response.
    ResponseValue,
    /// Any value this client does not know about, preserved as-is.
    Other(i32),
}

impl PacketType {
    /// Wire value of the type field.
    pub fn as_i32(self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::ExecOrAuthResponse => 2,
            PacketType::ResponseValue => 0,
            PacketType::Other(v) => v,
        }
    }
}

impl From<i32> for PacketType {
    fn from(value: i32) -> Self {
        match value {
            3 => PacketType::Auth,
            2 => PacketType::ExecOrAuthResponse,
            0 => PacketType::ResponseValue,
            other => PacketType::Other(other),
        }
    }
}

/// A single decoded (or to-be-encoded) RCON frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Correlates a response with the request that caused it.
    pub request_id: i32,
    /// What kind of packet this is.
    pub packet_type: PacketType,
    /// Raw payload, without the trailing terminator.
    pub payload: Bytes,
}

impl Packet {
    /// Creates a packet from its parts.
    pub fn new(request_id: i32, packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            packet_type,
            payload: payload.into(),
        }
    }

    /// Creates an authentication request carrying `password`.
    pub fn auth(request_id: i32, password: &str) -> Self {
        Self::new(
            request_id,
            PacketType::Auth,
            Bytes::copy_from_slice(password.as_bytes()),
        )
    }

    /// Creates a command execution request.
    pub fn exec(request_id: i32, command: &str) -> Self {
        Self::new(
            request_id,
            PacketType::ExecOrAuthResponse,
            Bytes::copy_from_slice(command.as_bytes()),
        )
    }

    /// Value of the `size` field for this packet.
    ///
    /// This counts everything after the size field itself: request id,
    /// type, payload and terminator.
    pub fn size(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }

    /// Payload decoded as UTF-8, lossily, with trailing NUL bytes removed.
    pub fn text(&self) -> String {
        let raw = String::from_utf8_lossy(&self.payload);
        raw.trim_end_matches('\0').to_string()
    }

    /// Payload prepared for display, see [`sanitize`].
    pub fn display_text(&self) -> String {
        sanitize(&self.text())
    }

    /// Serializes this packet into a complete frame.
    pub fn encode(&self) -> Bytes {
        super::parser::encode(self.request_id, self.packet_type, &self.payload)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} type={} \"{}\"",
            self.request_id,
            self.packet_type.as_i32(),
            self.display_text()
        )
    }
}

/// Strips characters that would garble a terminal or log line.
///
/// Keeps printable ASCII plus the scripts player names commonly use on
/// Palworld servers: CJK ideographs, Hiragana, Katakana, Hangul and
/// Cyrillic. Everything else (control bytes, replacement characters,
/// emoji) is dropped. This only affects presentation; framing always uses
/// the raw payload length.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|c| is_displayable(*c)).collect()
}

fn is_displayable(c: char) -> bool {
    matches!(c,
        '\u{20}'..='\u{7E}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{0400}'..='\u{04FF}')
}
