//! Connection Registry
//!
//! Holds every configured server connection, keyed by `host:port`, and
//! runs operations against a [`Target`].
//!
//! ## Fan-Out
//!
//! ```text
//!   registry.save(&Target::All)
//!            │
//!            │ resolve (at call time)
//!            ▼
//!   ┌────────┬────────┬────────┐
//!   │ conn A │ conn B │ conn C │   dispatched concurrently
//!   └───┬────┴───┬────┴───┬────┘
//!       ▼        ▼        ▼
//!      Ok       Err       Ok      every outcome is collected
//! ```
//!
//! Argument validation and target resolution happen before any command is
//! sent, and fail the whole call. Once dispatched, each connection's result
//! is reported on its own.

use crate::commands::{dispatch, Command, CommandError, ValidationError};
use crate::config::{ConnectionConfig, ServerConfig};
use crate::connection::{Connection, ConnectionHooks};
use crate::registry::target::{FanOut, Outcome, Target};
use futures::future::join_all;
use std::future::Future;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that fail a registry call as a whole.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No registered connection matches the target
    #[error("no connection registered for '{0}'")]
    TargetNotFound(String),

    /// A connection for this address is already registered
    #[error("a connection for '{0}' is already registered")]
    AlreadyRegistered(String),

    /// A command argument was rejected before dispatch
    #[error("invalid argument: {0}")]
    Invalid(#[from] ValidationError),
}

/// The set of servers this process administers.
pub struct Registry {
    /// Connections in registration order
    connections: RwLock<Vec<Connection>>,
    /// Applied to connections created by [`register`](Self::register)
    config: ConnectionConfig,
    hooks: ConnectionHooks,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ConnectionConfig::default(), ConnectionHooks::new())
    }
}

impl Registry {
    pub fn new(config: ConnectionConfig, hooks: ConnectionHooks) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            config,
            hooks,
        }
    }

    /// Creates a connection for `server` and adds it to the registry.
    ///
    /// The socket is opened lazily, on first use.
    pub fn register(&self, server: ServerConfig) -> Result<Connection, RegistryError> {
        let address = server.address();
        let mut connections = self.connections.write().unwrap();
        if connections.iter().any(|c| c.address() == address) {
            return Err(RegistryError::AlreadyRegistered(address));
        }

        let conn = Connection::new(server, self.config.clone(), self.hooks.clone());
        connections.push(conn.clone());
        info!(server = %address, total = connections.len(), "Server registered");
        Ok(conn)
    }

    /// Adds an existing connection, e.g. one built with its own hooks.
    pub fn insert(&self, conn: Connection) -> Result<(), RegistryError> {
        let mut connections = self.connections.write().unwrap();
        if connections.iter().any(|c| c.address() == conn.address()) {
            return Err(RegistryError::AlreadyRegistered(conn.address().to_string()));
        }
        info!(server = %conn.address(), "Server registered");
        connections.push(conn);
        Ok(())
    }

    /// Removes the connections `target` resolves to and disconnects them.
    pub async fn remove(&self, target: &Target) -> Result<Vec<Connection>, RegistryError> {
        let removed = self.resolve(target)?;
        {
            let mut connections = self.connections.write().unwrap();
            connections.retain(|c| !removed.iter().any(|r| r.id() == c.id()));
        }
        for conn in &removed {
            conn.disconnect().await;
            info!(server = %conn.address(), "Server removed");
        }
        Ok(removed)
    }

    /// Disconnects and forgets every connection.
    pub async fn shutdown(&self) {
        let all: Vec<Connection> = std::mem::take(&mut *self.connections.write().unwrap());
        join_all(all.iter().map(|c| c.disconnect())).await;
        info!(count = all.len(), "Registry shut down");
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of all registered connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.read().unwrap().clone()
    }

    pub fn get(&self, address: &str) -> Option<Connection> {
        self.connections
            .read()
            .unwrap()
            .iter()
            .find(|c| c.address() == address)
            .cloned()
    }

    /// Resolves a target to the connections it names.
    ///
    /// `All` reflects the registry at the moment of the call. An address or
    /// handle that is not registered is an error, never an empty result.
    pub fn resolve(&self, target: &Target) -> Result<Vec<Connection>, RegistryError> {
        let connections = self.connections.read().unwrap();
        match target {
            Target::All => Ok(connections.clone()),
            Target::ByAddress(address) => connections
                .iter()
                .find(|c| c.address() == address.as_str())
                .cloned()
                .map(|c| vec![c])
                .ok_or_else(|| RegistryError::TargetNotFound(address.clone())),
            Target::ByHandle(id) => connections
                .iter()
                .find(|c| c.id() == *id)
                .cloned()
                .map(|c| vec![c])
                .ok_or_else(|| RegistryError::TargetNotFound(id.to_string())),
        }
    }

    /// Runs `op` on every connection `target` resolves to, concurrently.
    pub async fn fan_out<T, F, Fut>(
        &self,
        target: &Target,
        op: F,
    ) -> Result<FanOut<T>, RegistryError>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let connections = self.resolve(target)?;
        debug!(target = %target, count = connections.len(), "Fanning out");

        let results = join_all(connections.iter().cloned().map(&op)).await;
        let outcomes = connections
            .iter()
            .zip(results)
            .map(|(conn, result)| Outcome {
                id: conn.id(),
                address: conn.address().to_string(),
                result,
            })
            .collect();
        Ok(FanOut::new(outcomes))
    }

    /// Runs an already validated command.
    pub async fn run(
        &self,
        target: &Target,
        command: &Command,
    ) -> Result<FanOut<String>, RegistryError> {
        self.fan_out(target, |conn| async move { dispatch(&conn, command).await })
            .await
    }

    /// Sends arbitrary command text.
    pub async fn send(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<FanOut<String>, RegistryError> {
        self.run(target, &Command::raw(command)).await
    }

    pub async fn broadcast(
        &self,
        target: &Target,
        message: &str,
    ) -> Result<FanOut<String>, RegistryError> {
        self.run(target, &Command::broadcast(message)).await
    }

    pub async fn save(&self, target: &Target) -> Result<FanOut<String>, RegistryError> {
        self.run(target, &Command::Save).await
    }

    pub async fn shutdown_server(
        &self,
        target: &Target,
        seconds: &str,
        message: &str,
    ) -> Result<FanOut<String>, RegistryError> {
        let command = Command::shutdown(seconds, message)?;
        self.run(target, &command).await
    }

    pub async fn show_players(&self, target: &Target) -> Result<FanOut<String>, RegistryError> {
        self.run(target, &Command::ShowPlayers).await
    }

    pub async fn info(&self, target: &Target) -> Result<FanOut<String>, RegistryError> {
        self.run(target, &Command::Info).await
    }

    pub async fn kick(
        &self,
        target: &Target,
        steam_id: &str,
    ) -> Result<FanOut<String>, RegistryError> {
        let command = Command::kick(steam_id)?;
        self.run(target, &command).await
    }

    pub async fn ban(
        &self,
        target: &Target,
        steam_id: &str,
    ) -> Result<FanOut<String>, RegistryError> {
        let command = Command::ban(steam_id)?;
        self.run(target, &command).await
    }

    /// Whether each targeted connection is, or can become, authenticated.
    pub async fn check_connection(&self, target: &Target) -> Result<FanOut<bool>, RegistryError> {
        self.fan_out(target, |conn| async move { Ok(conn.check_connection().await) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionError, SocketState};
    use crate::test_support::{unused_address, FakeServer, PLAYER_LIST};
    use std::time::Duration;

    fn test_registry() -> Registry {
        Registry::new(
            ConnectionConfig {
                reconnect_delay: Duration::from_millis(50),
                max_reconnect_attempts: Some(0),
                connect_timeout: Some(Duration::from_secs(2)),
                request_timeout: Some(Duration::from_secs(2)),
            },
            ConnectionHooks::new(),
        )
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = test_registry();
        let server = FakeServer::start("pw").await;
        let conn = registry.register(server.config("pw")).unwrap();

        assert_eq!(registry.len(), 1);
        let by_address = registry.resolve(&Target::address(server.address())).unwrap();
        assert_eq!(by_address[0].id(), conn.id());
        let by_handle = registry.resolve(&Target::from(&conn)).unwrap();
        assert_eq!(by_handle[0].id(), conn.id());

        assert!(matches!(
            registry.register(server.config("pw")),
            Err(RegistryError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_address_is_not_found() {
        let registry = test_registry();
        let server = FakeServer::start("pw").await;
        registry.register(server.config("pw")).unwrap();

        assert_eq!(
            registry.resolve(&Target::from("host:1234")).unwrap_err(),
            RegistryError::TargetNotFound("host:1234".to_string())
        );
        assert!(matches!(
            registry.save(&Target::from("host:1234")).await,
            Err(RegistryError::TargetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_all_is_resolved_at_call_time() {
        let registry = test_registry();
        assert!(registry.resolve(&Target::All).unwrap().is_empty());

        let first = FakeServer::start("pw").await;
        let second = FakeServer::start("pw").await;
        registry.register(first.config("pw")).unwrap();
        assert_eq!(registry.resolve(&Target::All).unwrap().len(), 1);

        registry.register(second.config("pw")).unwrap();
        assert_eq!(registry.resolve(&Target::All).unwrap().len(), 2);

        registry
            .remove(&Target::address(first.address()))
            .await
            .unwrap();
        let remaining = registry.resolve(&Target::All).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].address(), second.address());
    }

    #[tokio::test]
    async fn test_fan_out_reports_each_outcome() {
        let registry = test_registry();
        let a = FakeServer::start("pw").await;
        let b = FakeServer::start("pw").await;
        registry.register(a.config("pw")).unwrap();
        let dead = unused_address().await;
        let dead_address = dead.address();
        registry.register(dead).unwrap();
        registry.register(b.config("pw")).unwrap();

        let results = registry.save(&Target::All).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.successes().count(), 2);
        assert_eq!(results.failures().count(), 1);
        assert!(matches!(
            results.get(&dead_address),
            Some(Err(CommandError::Connection(ConnectionError::Transport(_))))
        ));
        assert_eq!(a.received(), vec!["Save"]);
        assert_eq!(b.received(), vec!["Save"]);
    }

    #[tokio::test]
    async fn test_fan_out_with_default_retry_policy_completes() {
        let registry = Registry::default();
        let a = FakeServer::start("pw").await;
        let b = FakeServer::start("pw").await;
        registry.register(a.config("pw")).unwrap();
        let dead = unused_address().await;
        let dead_address = dead.address();
        registry.register(dead).unwrap();
        registry.register(b.config("pw")).unwrap();

        let results = tokio::time::timeout(Duration::from_secs(3), registry.save(&Target::All))
            .await
            .expect("unreachable server held up the fan-out")
            .unwrap();
        assert_eq!(results.successes().count(), 2);
        assert!(matches!(
            results.get(&dead_address),
            Some(Err(CommandError::Connection(ConnectionError::Transport(_))))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let registry = test_registry();
        let a = FakeServer::start("pw").await;
        let b = FakeServer::start("pw").await;
        registry.register(a.config("pw")).unwrap();
        registry.register(b.config("pw")).unwrap();

        let results = registry
            .broadcast(&Target::All, "hello world")
            .await
            .unwrap();
        assert!(results.all_ok());
        assert_eq!(a.received(), vec!["Broadcast hello_world"]);
        assert_eq!(b.received(), vec!["Broadcast hello_world"]);
    }

    #[tokio::test]
    async fn test_validation_fails_before_any_io() {
        let registry = test_registry();
        let server = FakeServer::start("pw").await;
        let conn = registry.register(server.config("pw")).unwrap();

        assert!(matches!(
            registry.kick(&Target::All, "abc").await,
            Err(RegistryError::Invalid(_))
        ));
        assert!(matches!(
            registry.ban(&Target::All, "").await,
            Err(RegistryError::Invalid(_))
        ));
        assert!(matches!(
            registry.shutdown_server(&Target::All, "1m", "bye").await,
            Err(RegistryError::Invalid(_))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(conn.socket_state(), SocketState::Closed);
        assert_eq!(server.accepted(), 0);
    }

    #[tokio::test]
    async fn test_show_players_returns_payload_text() {
        let registry = test_registry();
        let server = FakeServer::start("pw").await;
        registry.register(server.config("pw")).unwrap();

        let target = Target::address(server.address());
        let results = registry.show_players(&target).await.unwrap();
        let (_, text) = results.successes().next().unwrap();
        assert_eq!(text, PLAYER_LIST);
    }

    #[tokio::test]
    async fn test_check_connection() {
        let registry = test_registry();
        let good = FakeServer::start("pw").await;
        let bad_password = FakeServer::start("pw").await;
        registry.register(good.config("pw")).unwrap();
        registry.register(bad_password.config("nope")).unwrap();

        let results = registry.check_connection(&Target::All).await.unwrap();
        assert!(matches!(results.get(&good.address()), Some(Ok(true))));
        assert!(matches!(results.get(&bad_password.address()), Some(Ok(false))));
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let registry = test_registry();
        let server = FakeServer::start("pw").await;
        let conn = registry.register(server.config("pw")).unwrap();
        conn.connect().await.unwrap();

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(conn.socket_state(), SocketState::Closed);
        assert!(matches!(
            conn.execute("Save").await,
            Err(ConnectionError::Disconnected)
        ));
    }
}
