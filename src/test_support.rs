//! In-process fake RCON server used by the unit tests.

use crate::config::ServerConfig;
use crate::protocol::{encode, FrameDecoder, PacketType};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub(crate) const PLAYER_LIST: &str =
    "name,playeruid,steamid\nAriz,1234567890,76561198000000001\nLeo,2233445566,76561198000000002\n";

/// Canned answers resembling a Palworld server.
pub(crate) fn palworld_response(command: &str) -> Option<String> {
    let reply = match command {
        "ShowPlayers" => PLAYER_LIST.to_string(),
        "Save" => "Complete Save".to_string(),
        other if other.starts_with("Broadcast ") => format!("Broadcasted: {}", &other[10..]),
        other => format!("ok: {}", other),
    };
    Some(reply)
}

pub(crate) struct FakeServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    kick: watch::Sender<u64>,
    acceptor: JoinHandle<()>,
}

impl FakeServer {
    pub(crate) async fn start(password: &str) -> Self {
        Self::with_responder(password, palworld_response).await
    }

    pub(crate) async fn with_responder<F>(password: &str, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (kick, kick_rx) = watch::channel(0u64);
        let responder: Responder = Arc::new(responder);
        let password = password.to_string();

        let received_clone = Arc::clone(&received);
        let accepted_clone = Arc::clone(&accepted);
        let acceptor = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    password.clone(),
                    Arc::clone(&responder),
                    Arc::clone(&received_clone),
                    kick_rx.clone(),
                ));
            }
        });

        Self {
            addr,
            received,
            accepted,
            kick,
            acceptor,
        }
    }

    pub(crate) fn address(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn config(&self, password: &str) -> ServerConfig {
        ServerConfig::new("127.0.0.1", self.addr.port(), password)
    }

    /// Commands received so far, across all connections, in arrival order.
    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// TCP connections accepted so far.
    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Closes every currently open client socket.
    pub(crate) fn drop_clients(&self) {
        self.kick.send_modify(|generation| *generation += 1);
    }

    /// Closes the listener and every client, so new connects are refused.
    pub(crate) fn stop(&self) {
        self.acceptor.abort();
        self.drop_clients();
    }
}

async fn serve(
    mut stream: TcpStream,
    password: String,
    responder: Responder,
    received: Arc<Mutex<Vec<String>>>,
    mut kick: watch::Receiver<u64>,
) {
    let _ = *kick.borrow_and_update();
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 1024];

    loop {
        while let Ok(Some(packet)) = decoder.next_packet() {
            let reply = match packet.packet_type {
                PacketType::Auth => {
                    let id = if packet.text() == password {
                        packet.request_id
                    } else {
                        -1
                    };
                    let mut frames = encode(id, PacketType::ResponseValue, b"").to_vec();
                    frames.extend_from_slice(&encode(id, PacketType::ExecOrAuthResponse, b""));
                    frames
                }
                _ => {
                    let command = packet.text();
                    received.lock().unwrap().push(command.clone());
                    match responder(&command) {
                        Some(text) => {
                            encode(packet.request_id, PacketType::ResponseValue, text.as_bytes())
                                .to_vec()
                        }
                        None => continue,
                    }
                }
            };
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }

        tokio::select! {
            read = stream.read(&mut chunk) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => decoder.extend(&chunk[..n]),
            },
            _ = kick.changed() => return,
        }
    }
}

/// A server config pointing at a port nothing listens on.
pub(crate) async fn unused_address() -> ServerConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ServerConfig::new("127.0.0.1", port, "unused")
}

/// A server that accepts connections and never answers, not even the
/// auth request.
pub(crate) async fn silent_server() -> ServerConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    ServerConfig::new("127.0.0.1", port, "unused")
}
