//! Connection Driver
//!
//! Each configured server gets one [`Connection`]: a cheap, cloneable handle
//! plus a background driver task that owns the socket, the read buffer and
//! the FIFO command queue.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!            execute() / connect()
//!   Closed ─────────────────────────> Connecting
//!     ▲                                   │ TCP established
//!     │                                   ▼
//!     │  socket error / peer close     Open + Authenticating
//!     │  disconnect() / auth rejected     │ auth reply matches
//!     │                                   ▼
//!     └──────────────────────────── Open + Authenticated
//!                                          │
//!                                          ▼
//!                                 flush queue, one command
//!                                 in flight at a time
//! ```
//!
//! ## Driver Loop
//!
//! The driver waits on five things at once:
//!
//! 1. A request from a handle (execute, connect, disconnect)
//! 2. The current connect or handshake attempt, if any
//! 3. Bytes from the socket, decoded into frames as they complete
//! 4. The reconnect deadline, armed when a dropped socket has queued work
//! 5. The in-flight deadline, armed when a request timeout is configured
//!
//! Because only the driver touches the queue, the socket and the reconnect
//! deadline, there is exactly one writer for all mutable connection state.

use crate::config::{ConnectionConfig, ServerConfig};
use crate::connection::handshake;
use crate::protocol::{decode, FrameError, Packet};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State of the TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// State of the RCON session on top of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// The server rejected the password. Cleared only by an explicit
    /// [`Connection::connect`].
    AuthFailed,
}

/// Snapshot of a connection, published by the driver after every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub socket: SocketState,
    pub auth: AuthState,
    /// Commands waiting to be transmitted
    pub queued: usize,
    /// Request id awaiting a response
    pub in_flight: Option<i32>,
    /// A reconnect attempt is scheduled
    pub reconnect_pending: bool,
}

impl ConnectionStatus {
    fn initial() -> Self {
        Self {
            socket: SocketState::Closed,
            auth: AuthState::Unauthenticated,
            queued: 0,
            in_flight: None,
            reconnect_pending: false,
        }
    }
}

/// Statistics for one connection
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// TCP connections established
    pub connects: AtomicU64,
    /// Handshakes rejected by the server
    pub auth_failures: AtomicU64,
    /// Command frames written
    pub commands_sent: AtomicU64,
    /// Non-auth frames received
    pub responses_received: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur on a connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// The server closed the socket
    #[error("connection closed by server")]
    PeerClosed,

    /// The server sent a frame with an impossible size
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The server rejected the password
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The connection was explicitly torn down
    #[error("disconnected")]
    Disconnected,

    /// No response arrived within the configured request timeout
    #[error("timed out waiting for response")]
    Timeout,

    /// The driver task is gone
    #[error("connection driver has shut down")]
    Shutdown,
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::Transport(Arc::new(err))
    }
}

impl ConnectionError {
    /// Whether this error came from the socket rather than from the
    /// session or the caller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ConnectionError::Transport(_) | ConnectionError::PeerClosed | ConnectionError::Frame(_)
        )
    }
}

type DisconnectHook = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &ConnectionError) + Send + Sync>;
type DataHook = Arc<dyn Fn(&str, &Packet) + Send + Sync>;

/// Optional observers invoked from the driver task.
///
/// Every hook receives the server address first. Hooks run inline on the
/// driver, so they must not block.
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    on_disconnect: Option<DisconnectHook>,
    on_transport_error: Option<ErrorHook>,
    on_data: Option<DataHook>,
}

impl ConnectionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called whenever an established socket closes, for any reason.
    pub fn on_disconnect(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Called for socket failures, including failed connect attempts.
    pub fn on_transport_error(
        mut self,
        hook: impl Fn(&str, &ConnectionError) + Send + Sync + 'static,
    ) -> Self {
        self.on_transport_error = Some(Arc::new(hook));
        self
    }

    /// Called for every decoded frame that is not part of the handshake:
    /// command responses as well as anything the server pushes.
    pub fn on_data(mut self, hook: impl Fn(&str, &Packet) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ConnectionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHooks")
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_transport_error", &self.on_transport_error.is_some())
            .field("on_data", &self.on_data.is_some())
            .finish()
    }
}

type Reply<T> = oneshot::Sender<Result<T, ConnectionError>>;

/// Messages from handles to the driver.
enum Request {
    Execute { command: String, reply: Reply<String> },
    Connect { reply: Reply<()> },
    Disconnect { reply: oneshot::Sender<()> },
}

/// A handle to one game server.
///
/// Cloning is cheap; all clones talk to the same driver task. When the
/// last clone is dropped the driver closes the socket and exits.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

struct Shared {
    id: ConnectionId,
    address: String,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ConnectionStatus>,
    stats: Arc<ConnectionStats>,
}

impl Connection {
    /// Creates a connection and spawns its driver task.
    ///
    /// No socket is opened yet; that happens on [`connect`](Self::connect)
    /// or on the first [`execute`](Self::execute). Must be called from
    /// within a Tokio runtime.
    pub fn new(server: ServerConfig, config: ConnectionConfig, hooks: ConnectionHooks) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::initial());
        let stats = Arc::new(ConnectionStats::new());
        let address = server.address();

        let driver = Driver {
            address: address.clone(),
            password: server.password,
            config,
            hooks,
            stats: Arc::clone(&stats),
            requests: requests_rx,
            status: status_tx,
            stream: None,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            socket: SocketState::Closed,
            auth: AuthState::Unauthenticated,
            closed_by: CloseReason::NeverOpened,
            attempt: None,
            connect_waiters: Vec::new(),
            queue: VecDeque::new(),
            in_flight: None,
            reconnect_at: None,
            reconnect_attempts: 0,
            next_request_id: 1,
        };
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(Shared {
                id: ConnectionId::next(),
                address,
                requests: requests_tx,
                status: status_rx,
                stats,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// The `host:port` this connection talks to.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn socket_state(&self) -> SocketState {
        self.status().socket
    }

    pub fn auth_state(&self) -> AuthState {
        self.status().auth
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state() == AuthState::Authenticated
    }

    /// Subscribes to status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.inner.stats
    }

    /// Opens the socket and authenticates, unless already authenticated.
    ///
    /// Clears a previous authentication failure and cancels any scheduled
    /// reconnect in favour of connecting right away.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Connect { reply })?;
        rx.await.map_err(|_| ConnectionError::Shutdown)?
    }

    /// Closes the socket. The in-flight command and every queued command
    /// fail with [`ConnectionError::Disconnected`], as does any later
    /// command until [`connect`](Self::connect) is called again.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Request::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Runs a command and returns the text of its response.
    ///
    /// Connects and authenticates first if this connection has never been
    /// opened; if that attempt fails, so does the command. If an established
    /// socket dropped, the command is queued and a single reconnect is
    /// scheduled. Commands on one connection are transmitted one at a time,
    /// in call order.
    pub async fn execute(&self, command: &str) -> Result<String, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Execute {
            command: command.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ConnectionError::Shutdown)?
    }

    /// Returns `true` if the connection is authenticated, or becomes so
    /// after a connect attempt.
    pub async fn check_connection(&self) -> bool {
        if self.is_authenticated() {
            return true;
        }
        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                debug!(server = %self.address(), error = %e, "Connection check failed");
                false
            }
        }
    }

    fn send(&self, request: Request) -> Result<(), ConnectionError> {
        self.inner
            .requests
            .send(request)
            .map_err(|_| ConnectionError::Shutdown)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("status", &self.status())
            .finish()
    }
}

/// Why the socket is currently closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// No session has been established yet. Commands connect right away,
    /// and a failed attempt fails them.
    NeverOpened,
    /// Lost after a session was established; queued work triggers a
    /// delayed reconnect.
    Dropped,
    /// Torn down by `disconnect()`.
    Disconnected,
    /// Password rejected.
    AuthFailed,
}

struct QueuedCommand {
    text: String,
    reply: Reply<String>,
}

struct InFlight {
    request_id: i32,
    text: String,
    reply: Reply<String>,
    deadline: Option<Instant>,
}

type Pending<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The socket handed back by the handshake phase, with whatever was read
/// past the auth reply.
struct Handshake {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    result: Result<i32, ConnectionError>,
}

/// A session being established. Polled by the driver loop alongside
/// requests, so a `disconnect()` can abandon it at any point.
enum Attempt {
    Connecting(Pending<Result<TcpStream, ConnectionError>>),
    Authenticating(Pending<Handshake>),
}

enum Step {
    Connected(Result<TcpStream, ConnectionError>),
    Authenticated(Handshake),
}

enum Event {
    Request(Option<Request>),
    Attempt(Step),
    Read(std::io::Result<usize>),
    ReconnectDue,
    RequestTimedOut,
}

/// Owns everything mutable about one connection.
struct Driver {
    address: String,
    password: String,
    config: ConnectionConfig,
    hooks: ConnectionHooks,
    stats: Arc<ConnectionStats>,
    requests: mpsc::UnboundedReceiver<Request>,
    status: watch::Sender<ConnectionStatus>,
    stream: Option<BufWriter<TcpStream>>,
    buffer: BytesMut,
    socket: SocketState,
    auth: AuthState,
    closed_by: CloseReason,
    attempt: Option<Attempt>,
    connect_waiters: Vec<Reply<()>>,
    queue: VecDeque<QueuedCommand>,
    in_flight: Option<InFlight>,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    next_request_id: i32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.transmit_next().await;
            self.publish();

            let reconnect_at = self.reconnect_at;
            let deadline = self.in_flight.as_ref().and_then(|f| f.deadline);

            let event = tokio::select! {
                request = self.requests.recv() => Event::Request(request),
                step = advance(self.attempt.as_mut()) => Event::Attempt(step),
                read = read_some(self.stream.as_mut(), &mut self.buffer) => Event::Read(read),
                _ = sleep_until(reconnect_at) => Event::ReconnectDue,
                _ = sleep_until(deadline) => Event::RequestTimedOut,
            };

            match event {
                Event::Request(Some(request)) => self.handle_request(request).await,
                Event::Request(None) => break,
                Event::Attempt(step) => self.handle_step(step),
                Event::Read(Ok(0)) => self.connection_lost(ConnectionError::PeerClosed),
                Event::Read(Ok(n)) => {
                    self.stats.bytes_read(n);
                    trace!(server = %self.address, bytes = n, "Read data");
                    self.process_frames();
                }
                Event::Read(Err(e)) => self.connection_lost(e.into()),
                Event::ReconnectDue => self.reconnect(),
                Event::RequestTimedOut => self.time_out_in_flight(),
            }
        }

        debug!(server = %self.address, "All handles dropped, stopping driver");
        self.attempt = None;
        self.close_socket();
        self.resolve_waiters(Err(ConnectionError::Shutdown));
        self.fail_pending(ConnectionError::Shutdown);
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Execute { command, reply } => self.enqueue(command, reply),
            Request::Connect { reply } => {
                if self.auth == AuthState::Authenticated {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.connect_waiters.push(reply);
                if self.attempt.is_none() {
                    self.reconnect_at = None;
                    self.reconnect_attempts = 0;
                    self.begin_attempt();
                }
            }
            Request::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
        }
    }

    fn enqueue(&mut self, text: String, reply: Reply<String>) {
        match self.closed_by {
            CloseReason::AuthFailed if self.socket == SocketState::Closed => {
                let _ = reply.send(Err(ConnectionError::AuthenticationFailed));
                return;
            }
            CloseReason::Disconnected if self.socket == SocketState::Closed => {
                let _ = reply.send(Err(ConnectionError::Disconnected));
                return;
            }
            _ => {}
        }

        self.queue.push_back(QueuedCommand { text, reply });
        debug!(
            server = %self.address,
            queued = self.queue.len(),
            "Command queued"
        );

        if self.socket == SocketState::Closed {
            if self.closed_by == CloseReason::NeverOpened {
                self.begin_attempt();
            } else {
                self.schedule_reconnect();
            }
        }
    }

    /// Sends the next queued command if the session is idle.
    async fn transmit_next(&mut self) {
        if self.auth != AuthState::Authenticated || self.in_flight.is_some() {
            return;
        }

        while let Some(command) = self.queue.pop_front() {
            if command.reply.is_closed() {
                trace!(server = %self.address, "Skipping command abandoned by caller");
                continue;
            }

            let request_id = self.allocate_request_id();
            let frame = Packet::exec(request_id, &command.text).encode();

            match self.write_frame(&frame).await {
                Ok(()) => {
                    self.stats.command_sent();
                    trace!(
                        server = %self.address,
                        request_id,
                        command = %command.text,
                        "Sent command"
                    );
                    self.in_flight = Some(InFlight {
                        request_id,
                        text: command.text,
                        reply: command.reply,
                        deadline: self.config.request_timeout.map(|t| Instant::now() + t),
                    });
                }
                Err(e) => {
                    let _ = command.reply.send(Err(e.clone()));
                    self.connection_lost(e);
                }
            }
            return;
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::PeerClosed)?;
        stream.write_all(frame).await?;
        stream.flush().await?;
        self.stats.bytes_written(frame.len());
        Ok(())
    }

    fn allocate_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = if id == i32::MAX { 1 } else { id + 1 };
        id
    }

    fn process_frames(&mut self) {
        loop {
            match decode(&self.buffer) {
                Ok(Some((packet, consumed))) => {
                    let _ = self.buffer.split_to(consumed);
                    self.handle_packet(packet);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %self.address, error = %e, "Malformed frame");
                    self.connection_lost(e.into());
                    break;
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        self.stats.response_received();
        if let Some(hook) = &self.hooks.on_data {
            hook(&self.address, &packet);
        }

        match self.in_flight.take() {
            Some(pending) if pending.request_id == packet.request_id => {
                trace!(
                    server = %self.address,
                    request_id = packet.request_id,
                    bytes = packet.payload.len(),
                    "Response received"
                );
                let _ = pending.reply.send(Ok(packet.text()));
            }
            pending => {
                self.in_flight = pending;
                debug!(server = %self.address, packet = %packet, "Unsolicited frame");
            }
        }
    }

    fn time_out_in_flight(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            warn!(
                server = %self.address,
                request_id = pending.request_id,
                command = %pending.text,
                "Request timed out"
            );
            let _ = pending.reply.send(Err(ConnectionError::Timeout));
        }
    }

    /// Starts connecting, superseding any previous socket.
    fn begin_attempt(&mut self) {
        self.close_socket();
        self.socket = SocketState::Connecting;
        self.auth = AuthState::Unauthenticated;
        self.publish();
        debug!(server = %self.address, "Connecting");

        let address = self.address.clone();
        let limit = self.config.connect_timeout;
        self.attempt = Some(Attempt::Connecting(Box::pin(async move {
            let stream = within(limit, TcpStream::connect(address)).await??;
            stream.set_nodelay(true)?;
            Ok::<_, ConnectionError>(stream)
        })));
    }

    fn handle_step(&mut self, step: Step) {
        self.attempt = None;

        match step {
            Step::Connected(Ok(stream)) => {
                self.stats.connection_opened();
                self.socket = SocketState::Open;
                self.auth = AuthState::Authenticating;
                self.publish();
                info!(server = %self.address, "Connected");

                let password = self.password.clone();
                let limit = self.config.connect_timeout;
                let stats = Arc::clone(&self.stats);
                self.attempt = Some(Attempt::Authenticating(Box::pin(async move {
                    let mut stream = BufWriter::new(stream);
                    let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
                    let result =
                        handshake::authenticate(&mut stream, &mut buffer, &password, limit, &stats)
                            .await;
                    Handshake {
                        stream,
                        buffer,
                        result,
                    }
                })));
            }
            Step::Connected(Err(e)) => self.attempt_failed(e),
            Step::Authenticated(Handshake {
                stream,
                buffer,
                result: Ok(_),
            }) => {
                self.stream = Some(stream);
                self.buffer = buffer;
                self.auth = AuthState::Authenticated;
                self.closed_by = CloseReason::Dropped;
                self.reconnect_attempts = 0;
                self.publish();
                info!(server = %self.address, "Authenticated");
                self.resolve_waiters(Ok(()));

                if !self.buffer.is_empty() {
                    self.process_frames();
                }
            }
            Step::Authenticated(Handshake { result: Err(e), .. }) => self.attempt_failed(e),
        }
    }

    fn attempt_failed(&mut self, error: ConnectionError) {
        let was_open = self.socket == SocketState::Open;
        self.buffer.clear();
        self.socket = SocketState::Closed;

        if let ConnectionError::AuthenticationFailed = error {
            warn!(server = %self.address, "Authentication failed");
            self.stats.auth_failed();
            self.auth = AuthState::AuthFailed;
            self.closed_by = CloseReason::AuthFailed;
            self.publish();
            self.resolve_waiters(Err(ConnectionError::AuthenticationFailed));
            self.fail_pending(ConnectionError::AuthenticationFailed);
            if was_open {
                self.notify_disconnect();
            }
            return;
        }

        warn!(server = %self.address, error = %error, "Connect failed");
        self.auth = AuthState::Unauthenticated;
        self.publish();
        self.resolve_waiters(Err(error.clone()));
        self.notify_transport_error(&error);
        if was_open {
            self.notify_disconnect();
        }

        if self.closed_by == CloseReason::NeverOpened {
            // Nothing to resume; the next command tries again.
            self.fail_pending(error);
        } else {
            self.closed_by = CloseReason::Dropped;
            self.retry_or_give_up(&error);
        }
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        if self.socket != SocketState::Closed
            || self.closed_by != CloseReason::Dropped
            || self.attempt.is_some()
        {
            return;
        }
        self.reconnect_attempts += 1;
        info!(
            server = %self.address,
            attempt = self.reconnect_attempts,
            queued = self.queue.len(),
            "Reconnecting"
        );
        self.begin_attempt();
    }

    /// Arms the reconnect deadline unless one is already armed.
    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            trace!(server = %self.address, "Reconnect already scheduled");
            return;
        }
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
        debug!(
            server = %self.address,
            delay_ms = self.config.reconnect_delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    fn retry_or_give_up(&mut self, error: &ConnectionError) {
        if self.queue.is_empty() {
            return;
        }
        match self.config.max_reconnect_attempts {
            Some(max) if self.reconnect_attempts >= max => {
                warn!(
                    server = %self.address,
                    attempts = self.reconnect_attempts,
                    failed = self.queue.len(),
                    "Giving up on queued commands"
                );
                self.reconnect_attempts = 0;
                self.fail_pending(error.clone());
            }
            _ => self.schedule_reconnect(),
        }
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        let was_open = self.socket == SocketState::Open;

        if self.attempt.take().is_some() {
            debug!(server = %self.address, "Connection attempt abandoned");
        }
        if let Some(mut stream) = self.stream.take() {
            self.socket = SocketState::Closing;
            self.publish();
            let _ = stream.shutdown().await;
        }

        self.close_socket();
        self.closed_by = CloseReason::Disconnected;
        self.publish();
        self.resolve_waiters(Err(ConnectionError::Disconnected));
        self.fail_pending(ConnectionError::Disconnected);
        info!(server = %self.address, "Disconnected");
        if was_open {
            self.notify_disconnect();
        }
    }

    /// Tears down a socket that failed underneath us.
    fn connection_lost(&mut self, error: ConnectionError) {
        match &error {
            ConnectionError::PeerClosed => {
                info!(server = %self.address, "Server closed connection")
            }
            _ => warn!(server = %self.address, error = %error, "Connection lost"),
        }

        self.close_socket();
        self.closed_by = CloseReason::Dropped;
        self.publish();
        if let Some(pending) = self.in_flight.take() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        if !matches!(error, ConnectionError::PeerClosed) {
            self.notify_transport_error(&error);
        }
        self.notify_disconnect();

        if !self.queue.is_empty() {
            self.schedule_reconnect();
        }
    }

    fn close_socket(&mut self) {
        self.stream = None;
        self.buffer.clear();
        self.socket = SocketState::Closed;
        if self.auth != AuthState::AuthFailed {
            self.auth = AuthState::Unauthenticated;
        }
    }

    /// Answers every pending `connect()` call.
    fn resolve_waiters(&mut self, result: Result<(), ConnectionError>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    /// Resolves the in-flight command and every queued command with `error`.
    fn fail_pending(&mut self, error: ConnectionError) {
        if let Some(pending) = self.in_flight.take() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        for command in self.queue.drain(..) {
            let _ = command.reply.send(Err(error.clone()));
        }
    }

    fn notify_disconnect(&self) {
        if let Some(hook) = &self.hooks.on_disconnect {
            hook(&self.address);
        }
    }

    fn notify_transport_error(&self, error: &ConnectionError) {
        if let Some(hook) = &self.hooks.on_transport_error {
            hook(&self.address, error);
        }
    }

    fn publish(&self) {
        self.status.send_replace(ConnectionStatus {
            socket: self.socket,
            auth: self.auth,
            queued: self.queue.len(),
            in_flight: self.in_flight.as_ref().map(|f| f.request_id),
            reconnect_pending: self.reconnect_at.is_some(),
        });
    }
}

/// Drives the current connection attempt one phase forward.
async fn advance(attempt: Option<&mut Attempt>) -> Step {
    match attempt {
        Some(Attempt::Connecting(connect)) => Step::Connected(connect.await),
        Some(Attempt::Authenticating(handshake)) => Step::Authenticated(handshake.await),
        None => std::future::pending().await,
    }
}

async fn within<F: Future>(
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output, ConnectionError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ConnectionError::Timeout),
        None => Ok(future.await),
    }
}

async fn read_some(
    stream: Option<&mut BufWriter<TcpStream>>,
    buffer: &mut BytesMut,
) -> std::io::Result<usize> {
    match stream {
        Some(stream) => {
            if buffer.capacity() - buffer.len() < 1024 {
                buffer.reserve(INITIAL_BUFFER_SIZE);
            }
            stream.read_buf(buffer).await
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
