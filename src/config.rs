//! Client Configuration
//!
//! Two pieces of configuration exist:
//!
//! - [`ServerConfig`]: where a server lives and how to log in to it
//! - [`ConnectionConfig`]: timing knobs shared by connections (reconnect
//!   delay, retry cap, timeouts)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default RCON port of a Palworld dedicated server.
pub const DEFAULT_RCON_PORT: u16 = 25575;

/// Endpoint and credential of one game server.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or IP address
    pub host: String,
    /// RCON port
    pub port: u16,
    /// Admin password sent during the handshake
    pub password: String,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    /// Returns the `host:port` address, which is also the registry key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// The password never ends up in logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Errors from parsing a `password@host[:port]` server string.
///
/// Only the part after `@` is ever echoed back, never the password.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerParseError {
    #[error("expected 'password@host[:port]'")]
    MissingPassword,

    #[error("empty host in '{0}'")]
    EmptyHost(String),

    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

impl FromStr for ServerConfig {
    type Err = ServerParseError;

    /// Parses `password@host[:port]`. The password may itself contain `@`;
    /// the last one separates it from the host.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (password, endpoint) = s
            .rsplit_once('@')
            .ok_or(ServerParseError::MissingPassword)?;

        let (host, port) = match endpoint.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ServerParseError::InvalidPort(endpoint.to_string()))?;
                (host, port)
            }
            None => (endpoint, DEFAULT_RCON_PORT),
        };

        if host.is_empty() {
            return Err(ServerParseError::EmptyHost(endpoint.to_string()));
        }

        Ok(ServerConfig::new(host, port, password))
    }
}

/// Timing configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before reconnecting a dropped connection that has queued
    /// commands (default: 5s)
    pub reconnect_delay: Duration,

    /// Reconnect attempts before queued commands are failed.
    /// `None` retries forever (default).
    pub max_reconnect_attempts: Option<u32>,

    /// Limit on each phase of establishing a session: the TCP connect,
    /// then the handshake (default: 10s)
    pub connect_timeout: Option<Duration>,

    /// Limit on waiting for a single command response. `None` waits
    /// forever (default).
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: None,
            connect_timeout: Some(Duration::from_secs(10)),
            request_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_address() {
        let config: ServerConfig = "hunter2@10.0.0.5:25576".parse().unwrap();
        assert_eq!(config, ServerConfig::new("10.0.0.5", 25576, "hunter2"));
        assert_eq!(config.address(), "10.0.0.5:25576");
    }

    #[test]
    fn test_parse_default_port() {
        let config: ServerConfig = "pw@palworld.example.com".parse().unwrap();
        assert_eq!(config.port, DEFAULT_RCON_PORT);
        assert_eq!(config.host, "palworld.example.com");
    }

    #[test]
    fn test_parse_password_with_at() {
        let config: ServerConfig = "a@b@localhost:1".parse().unwrap();
        assert_eq!(config.password, "a@b");
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "localhost:25575".parse::<ServerConfig>(),
            Err(ServerParseError::MissingPassword)
        ));
        assert!(matches!(
            "pw@:25575".parse::<ServerConfig>(),
            Err(ServerParseError::EmptyHost(_))
        ));
        assert!(matches!(
            "pw@host:notaport".parse::<ServerConfig>(),
            Err(ServerParseError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_parse_error_hides_password() {
        let err = "hunter2@host:99999".parse::<ServerConfig>().unwrap_err();
        assert_eq!(err, ServerParseError::InvalidPort("host:99999".to_string()));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ServerConfig::new("localhost", 25575, "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_default_connection_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert!(config.max_reconnect_attempts.is_none());
        assert!(config.request_timeout.is_none());
    }
}
