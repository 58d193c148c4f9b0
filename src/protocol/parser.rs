//! Incremental RCON Frame Codec
//!
//! Encodes packets into frames and decodes frames from a byte buffer that
//! may hold a partial frame, exactly one frame, or several frames back to
//! back.
//!
//! ## How the Decoder Works
//!
//! The decoder reads from a buffer and returns either:
//! - `Ok(Some((packet, consumed)))` - A full frame was decoded, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the frame is incomplete
//! - `Err(FrameError)` - The size field is impossible, the stream cannot be resynchronised
//!
//! TCP may deliver a frame in arbitrarily small chunks, so a `size` that
//! runs past the end of the buffer is never an error: the caller appends
//! the next read to the buffer and tries again.

use crate::protocol::types::{Packet, PacketType, HEADER_LEN, MIN_FRAME_SIZE, TERMINATOR_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Length of the little-endian `size` prefix.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Largest `size` accepted from the server.
///
/// Servers split long outputs into 4 KiB payloads; anything larger than a
/// few frames' worth means the stream is out of sync.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The size field is smaller than the fixed header plus terminator.
    #[error("frame size {0} is below the minimum of {MIN_FRAME_SIZE}")]
    TooSmall(i32),

    /// The size field is larger than any frame the server should send.
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Result type for decoding operations.
pub type DecodeResult = Result<Option<(Packet, usize)>, FrameError>;

/// Encodes a packet into a complete frame.
///
/// Layout: `size`, `request_id`, `type` as little-endian `i32`, then the
/// payload, then two zero bytes.
pub fn encode(request_id: i32, packet_type: PacketType, payload: &[u8]) -> Bytes {
    let size = MIN_FRAME_SIZE + payload.len();
    let mut frame = BytesMut::with_capacity(SIZE_PREFIX_LEN + size);
    frame.put_i32_le(size as i32);
    frame.put_i32_le(request_id);
    frame.put_i32_le(packet_type.as_i32());
    frame.put_slice(payload);
    frame.put_bytes(0, TERMINATOR_LEN);
    frame.freeze()
}

/// Attempts to decode one frame from the front of `buf`.
pub fn decode(buf: &[u8]) -> DecodeResult {
    if buf.len() < SIZE_PREFIX_LEN {
        return Ok(None);
    }

    let declared = read_i32(&buf[..SIZE_PREFIX_LEN]);
    if declared < MIN_FRAME_SIZE as i32 {
        return Err(FrameError::TooSmall(declared));
    }

    let size = declared as usize;
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let total = SIZE_PREFIX_LEN + size;
    if buf.len() < total {
        return Ok(None);
    }

    let frame = &buf[SIZE_PREFIX_LEN..total];
    let request_id = read_i32(&frame[0..4]);
    let packet_type = PacketType::from(read_i32(&frame[4..8]));

    // The terminator is not validated: some servers pad with a single NUL
    // and rely on `size` alone.
    let payload = &frame[HEADER_LEN..size - TERMINATOR_LEN];

    let packet = Packet::new(request_id, packet_type, Bytes::copy_from_slice(payload));
    Ok(Some((packet, total)))
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    i32::from_le_bytes(raw)
}

/// A stateful decoder that owns its buffer.
///
/// Handy when bytes arrive from somewhere other than a socket the caller
/// already buffers, e.g. in tests feeding chunked input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pops the next complete frame, if any.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, FrameError> {
        match decode(&self.buffer)? {
            Some((packet, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    /// Bytes held but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(7, PacketType::Auth, b"secret");
        assert_eq!(frame.len(), 4 + 10 + 6);
        assert_eq!(&frame[0..4], &16i32.to_le_bytes());
        assert_eq!(&frame[4..8], &7i32.to_le_bytes());
        assert_eq!(&frame[8..12], &3i32.to_le_bytes());
        assert_eq!(&frame[12..18], b"secret");
        assert_eq!(&frame[18..], &[0, 0]);
    }

    #[test]
    fn test_decode_roundtrip() {
        for text in ["ShowPlayers", "", "Broadcast hello_world", "Игрок プレイヤー"] {
            let frame = encode(42, PacketType::ExecOrAuthResponse, text.as_bytes());
            let (packet, consumed) = decode(&frame).unwrap().unwrap();
            assert_eq!(consumed, frame.len());
            assert_eq!(packet.request_id, 42);
            assert_eq!(packet.packet_type, PacketType::ExecOrAuthResponse);
            assert_eq!(packet.text(), text);
        }
    }

    #[test]
    fn test_decode_failed_login_sentinel() {
        // What the server sends on a wrong password.
        let input = [
            0x0a, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let (packet, consumed) = decode(&input).unwrap().unwrap();
        assert_eq!(consumed, 14);
        assert_eq!(packet.request_id, -1);
        assert_eq!(packet.packet_type, PacketType::ExecOrAuthResponse);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        assert!(decode(b"").unwrap().is_none());
        assert!(decode(&[0x0a, 0x00]).unwrap().is_none());
    }

    #[test]
    fn test_decode_never_completes_early() {
        let frame = encode(3, PacketType::ResponseValue, b"name,playeruid,steamid");
        for len in 0..frame.len() {
            assert!(
                decode(&frame[..len]).unwrap().is_none(),
                "completed with only {} of {} bytes",
                len,
                frame.len()
            );
        }
    }

    #[test]
    fn test_split_at_every_point() {
        let frame = encode(9, PacketType::ResponseValue, b"Complete Save");
        let (whole, _) = decode(&frame).unwrap().unwrap();

        for split in 0..=frame.len() {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&frame[..split]);
            let early = decoder.next_packet().unwrap();
            decoder.extend(&frame[split..]);
            let packet = match early {
                Some(p) => p,
                None => decoder.next_packet().unwrap().unwrap(),
            };
            assert_eq!(packet, whole, "split at {}", split);
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut input = BytesMut::new();
        input.extend_from_slice(&encode(1, PacketType::ResponseValue, b"one"));
        input.extend_from_slice(&encode(2, PacketType::ResponseValue, b"two"));
        input.extend_from_slice(&encode(3, PacketType::ResponseValue, b"thr"));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&input[..input.len() - 1]);

        assert_eq!(decoder.next_packet().unwrap().unwrap().text(), "one");
        assert_eq!(decoder.next_packet().unwrap().unwrap().text(), "two");
        assert!(decoder.next_packet().unwrap().is_none());

        decoder.extend(&input[input.len() - 1..]);
        assert_eq!(decoder.next_packet().unwrap().unwrap().request_id, 3);
    }

    #[test]
    fn test_decode_size_too_small() {
        let mut input = encode(1, PacketType::ResponseValue, b"").to_vec();
        input[0] = 9;
        assert_eq!(decode(&input), Err(FrameError::TooSmall(9)));

        let negative = (-5i32).to_le_bytes();
        assert_eq!(decode(&negative), Err(FrameError::TooSmall(-5)));
    }

    #[test]
    fn test_decode_size_too_large() {
        let huge = ((MAX_FRAME_SIZE + 1) as i32).to_le_bytes();
        assert!(matches!(decode(&huge), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_payload_bytes_are_not_sanitized() {
        let frame = encode(1, PacketType::ResponseValue, b"a\x01b");
        let (packet, _) = decode(&frame).unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"a\x01b");
        assert_eq!(packet.display_text(), "ab");
    }
}
