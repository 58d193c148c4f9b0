//! Session Handshake
//!
//! Runs once per physical connection, right after the TCP connect:
//!
//! ```text
//! client                                   server
//!   │  Auth(id = random, payload = password)  │
//!   │────────────────────────────────────────>│
//!   │                                         │
//!   │  [ResponseValue(id), optional, ignored] │
//!   │<────────────────────────────────────────│
//!   │  ExecOrAuthResponse(id or -1)           │
//!   │<────────────────────────────────────────│
//! ```
//!
//! A reply of type `2` echoing the id we sent means success. Any other
//! echoed id is a rejection; servers conventionally echo `-1`.

use crate::connection::handler::{ConnectionError, ConnectionStats};
use crate::protocol::{decode, Packet, PacketType};
use bytes::BytesMut;
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// How the server answered one frame received during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReply {
    /// The server accepted the password.
    Accepted,
    /// The server rejected the password.
    Rejected,
    /// Not an authentication response; keep waiting.
    Ignored,
}

/// Picks a fresh request id for an authentication request.
///
/// Always positive so it can never collide with the `-1` rejection marker.
pub fn new_auth_request_id() -> i32 {
    rand::thread_rng().gen_range(1..=i32::MAX)
}

/// Classifies a frame received while authenticating.
pub fn check_auth_reply(sent_id: i32, packet: &Packet) -> AuthReply {
    match packet.packet_type {
        PacketType::ExecOrAuthResponse if packet.request_id == sent_id => AuthReply::Accepted,
        PacketType::ExecOrAuthResponse => AuthReply::Rejected,
        _ => AuthReply::Ignored,
    }
}

/// Sends the authentication request and waits for the verdict.
///
/// Bytes that arrive after the auth reply stay in `buffer` for the caller.
pub async fn authenticate<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    password: &str,
    timeout: Option<Duration>,
    stats: &ConnectionStats,
) -> Result<i32, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request_id = new_auth_request_id();
    let frame = Packet::auth(request_id, password).encode();

    stream.write_all(&frame).await?;
    stream.flush().await?;
    stats.bytes_written(frame.len());
    trace!(request_id, "Sent auth request");

    let exchange = async {
        loop {
            let packet = read_packet(stream, buffer, stats).await?;
            match check_auth_reply(request_id, &packet) {
                AuthReply::Accepted => return Ok::<i32, ConnectionError>(request_id),
                AuthReply::Rejected => {
                    debug!(
                        expected = request_id,
                        echoed = packet.request_id,
                        "Auth reply rejected"
                    );
                    return Err(ConnectionError::AuthenticationFailed);
                }
                AuthReply::Ignored => {
                    trace!(packet = %packet, "Skipping non-auth frame during handshake");
                }
            }
        }
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| ConnectionError::Timeout)?,
        None => exchange.await,
    }
}

/// Reads until one complete frame is buffered and returns it.
async fn read_packet<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    stats: &ConnectionStats,
) -> Result<Packet, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some((packet, consumed)) = decode(buffer)? {
            let _ = buffer.split_to(consumed);
            return Ok(packet);
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            return Err(ConnectionError::PeerClosed);
        }
        stats.bytes_read(n);
    }
}
