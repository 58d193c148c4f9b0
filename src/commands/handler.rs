//! Command Dispatcher
//!
//! Builds the text of the admin commands a Palworld server understands and
//! runs them over a [`Connection`].
//!
//! ## Supported Commands
//!
//! - `ShowPlayers` - List connected players (CSV with a header line)
//! - `Info` - Server name and version
//! - `Save` - Save the world
//! - `Shutdown {seconds} {message}` - Shut down after a delay, announcing it
//! - `DoExit` - Stop the server immediately
//! - `KickPlayer {steam_id}` - Kick a player
//! - `BanPlayer {steam_id}` - Ban a player
//! - `Broadcast {message}` - Show a message to every player
//!
//! The server splits arguments on spaces, so free-text arguments have their
//! spaces replaced with underscores. Numeric arguments are validated before
//! anything touches the network.

use crate::connection::{Connection, ConnectionError};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Argument validation failures, raised before any I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric argument was empty or contained something other than
    /// ASCII digits.
    #[error("{field} must contain only digits, got '{value}'")]
    NotNumeric { field: &'static str, value: String },
}

/// Errors from running a command on one connection.
#[derive(Debug, Error, Clone)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// An admin command with validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowPlayers,
    Info,
    Save,
    Shutdown { seconds: String, message: String },
    DoExit,
    Kick { steam_id: String },
    Ban { steam_id: String },
    Broadcast { message: String },
    /// Any other command text, sent verbatim
    Raw(String),
}

impl Command {
    /// `Shutdown`, with `seconds` and `message` validated and escaped.
    pub fn shutdown(seconds: &str, message: &str) -> Result<Self, ValidationError> {
        Ok(Command::Shutdown {
            seconds: require_digits("time", seconds)?,
            message: escape_spaces(message),
        })
    }

    pub fn kick(steam_id: &str) -> Result<Self, ValidationError> {
        Ok(Command::Kick {
            steam_id: require_digits("steam_id", steam_id)?,
        })
    }

    pub fn ban(steam_id: &str) -> Result<Self, ValidationError> {
        Ok(Command::Ban {
            steam_id: require_digits("steam_id", steam_id)?,
        })
    }

    pub fn broadcast(message: &str) -> Self {
        Command::Broadcast {
            message: escape_spaces(message),
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Command::Raw(text.into())
    }

    /// The exact text transmitted to the server.
    pub fn to_wire(&self) -> String {
        match self {
            Command::ShowPlayers => "ShowPlayers".to_string(),
            Command::Info => "Info".to_string(),
            Command::Save => "Save".to_string(),
            Command::Shutdown { seconds, message } if message.is_empty() => {
                format!("Shutdown {}", seconds)
            }
            Command::Shutdown { seconds, message } => format!("Shutdown {} {}", seconds, message),
            Command::DoExit => "DoExit".to_string(),
            Command::Kick { steam_id } => format!("KickPlayer {}", steam_id),
            Command::Ban { steam_id } => format!("BanPlayer {}", steam_id),
            Command::Broadcast { message } => format!("Broadcast {}", message),
            Command::Raw(text) => text.clone(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

fn require_digits(field: &'static str, value: &str) -> Result<String, ValidationError> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(value.to_string())
    } else {
        Err(ValidationError::NotNumeric {
            field,
            value: value.to_string(),
        })
    }
}

/// Replaces spaces so the server sees the message as one argument.
pub fn escape_spaces(message: &str) -> String {
    message.replace(' ', "_")
}

/// Runs a command and returns the response text.
pub async fn dispatch(conn: &Connection, command: &Command) -> Result<String, CommandError> {
    debug!(server = %conn.address(), command = %command, "Dispatching command");
    Ok(conn.execute(&command.to_wire()).await?)
}

/// Per-connection convenience wrappers.
///
/// Validation happens first; an invalid argument never opens a socket.
impl Connection {
    pub async fn show_players(&self) -> Result<String, CommandError> {
        dispatch(self, &Command::ShowPlayers).await
    }

    pub async fn info(&self) -> Result<String, CommandError> {
        dispatch(self, &Command::Info).await
    }

    pub async fn save(&self) -> Result<String, CommandError> {
        dispatch(self, &Command::Save).await
    }

    pub async fn shutdown(&self, seconds: &str, message: &str) -> Result<String, CommandError> {
        let command = Command::shutdown(seconds, message)?;
        dispatch(self, &command).await
    }

    pub async fn do_exit(&self) -> Result<String, CommandError> {
        dispatch(self, &Command::DoExit).await
    }

    pub async fn kick(&self, steam_id: &str) -> Result<String, CommandError> {
        let command = Command::kick(steam_id)?;
        dispatch(self, &command).await
    }

    pub async fn ban(&self, steam_id: &str) -> Result<String, CommandError> {
        let command = Command::ban(steam_id)?;
        dispatch(self, &command).await
    }

    pub async fn broadcast(&self, message: &str) -> Result<String, CommandError> {
        dispatch(self, &Command::broadcast(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::{ConnectionHooks, SocketState};
    use crate::test_support::{FakeServer, PLAYER_LIST};

    #[test]
    fn test_wire_text() {
        assert_eq!(Command::ShowPlayers.to_wire(), "ShowPlayers");
        assert_eq!(Command::Save.to_wire(), "Save");
        assert_eq!(Command::Info.to_wire(), "Info");
        assert_eq!(Command::DoExit.to_wire(), "DoExit");
        assert_eq!(
            Command::kick("76561198000000001").unwrap().to_wire(),
            "KickPlayer 76561198000000001"
        );
        assert_eq!(Command::ban("42").unwrap().to_wire(), "BanPlayer 42");
        assert_eq!(Command::raw("Help me").to_wire(), "Help me");
    }

    #[test]
    fn test_broadcast_escapes_spaces() {
        assert_eq!(
            Command::broadcast("hello world").to_wire(),
            "Broadcast hello_world"
        );
        assert_eq!(
            Command::broadcast("Player joined: Ariz.").to_wire(),
            "Broadcast Player_joined:_Ariz."
        );
    }

    #[test]
    fn test_shutdown_text() {
        assert_eq!(
            Command::shutdown("60", "Server restarting soon").unwrap().to_wire(),
            "Shutdown 60 Server_restarting_soon"
        );
        assert_eq!(Command::shutdown("1", "").unwrap().to_wire(), "Shutdown 1");
    }

    #[test]
    fn test_numeric_validation() {
        for bad in ["", "abc", "12a", "-1", "1 2", "１２"] {
            assert!(Command::kick(bad).is_err(), "accepted {:?}", bad);
            assert!(Command::ban(bad).is_err(), "accepted {:?}", bad);
            assert!(Command::shutdown(bad, "msg").is_err(), "accepted {:?}", bad);
        }

        let err = Command::kick("abc").unwrap_err();
        assert_eq!(
            err,
            ValidationError::NotNumeric {
                field: "steam_id",
                value: "abc".to_string()
            }
        );
        assert!(matches!(
            Command::shutdown("soon", ""),
            Err(ValidationError::NotNumeric { field: "time", .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_argument_opens_no_socket() {
        let server = FakeServer::start("secret").await;
        let conn = Connection::new(
            server.config("secret"),
            ConnectionConfig::default(),
            ConnectionHooks::new(),
        );

        assert!(matches!(conn.kick("not-a-number").await, Err(CommandError::Invalid(_))));
        assert!(matches!(conn.ban("x1").await, Err(CommandError::Invalid(_))));
        assert!(matches!(conn.shutdown("ten", "bye").await, Err(CommandError::Invalid(_))));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(conn.socket_state(), SocketState::Closed);
        assert_eq!(server.accepted(), 0);
    }

    #[tokio::test]
    async fn test_wrappers_transmit_expected_text() {
        let server = FakeServer::start("secret").await;
        let conn = Connection::new(
            server.config("secret"),
            ConnectionConfig::default(),
            ConnectionHooks::new(),
        );

        assert_eq!(conn.show_players().await.unwrap(), PLAYER_LIST);
        assert_eq!(conn.save().await.unwrap(), "Complete Save");
        conn.broadcast("hello world").await.unwrap();
        conn.kick("76561198000000001").await.unwrap();
        conn.ban("76561198000000002").await.unwrap();
        conn.shutdown("30", "bye all").await.unwrap();

        assert_eq!(
            server.received(),
            vec![
                "ShowPlayers",
                "Save",
                "Broadcast hello_world",
                "KickPlayer 76561198000000001",
                "BanPlayer 76561198000000002",
                "Shutdown 30 bye_all",
            ]
        );
    }
}
