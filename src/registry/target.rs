//! Targets and Fan-Out Results
//!
//! A [`Target`] names which registered servers an operation applies to.
//! Operations against several servers return a [`FanOut`], one
//! [`Outcome`] per server, so one server failing never hides what happened
//! on the others.

use crate::commands::CommandError;
use crate::connection::{Connection, ConnectionId};
use std::fmt;
use std::str::FromStr;

/// Which registered connections an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every connection registered at the time of the call
    All,
    /// The connection registered under this `host:port`
    ByAddress(String),
    /// A specific connection handle
    ByHandle(ConnectionId),
}

impl Target {
    pub fn address(address: impl Into<String>) -> Self {
        Target::ByAddress(address.into())
    }
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    /// `"all"` (any case) selects every server; anything else is an address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("all") {
            Target::All
        } else {
            Target::ByAddress(s.to_string())
        })
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(target) => target,
            Err(never) => match never {},
        }
    }
}

impl From<&Connection> for Target {
    fn from(conn: &Connection) -> Self {
        Target::ByHandle(conn.id())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::ByAddress(address) => f.write_str(address),
            Target::ByHandle(id) => write!(f, "{}", id),
        }
    }
}

/// Result of an operation on one connection.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub id: ConnectionId,
    pub address: String,
    pub result: Result<T, CommandError>,
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-connection results of a fan-out, in registration order.
#[derive(Debug, Clone)]
pub struct FanOut<T> {
    outcomes: Vec<Outcome<T>>,
}

impl<T> FanOut<T> {
    pub(crate) fn new(outcomes: Vec<Outcome<T>>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome<T>> {
        self.outcomes.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(value) => Some((o.address.as_str(), value)),
            Err(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &CommandError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(e) => Some((o.address.as_str(), e)),
        })
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_ok)
    }

    /// The outcome for `address`, if that server was part of the fan-out.
    pub fn get(&self, address: &str) -> Option<&Result<T, CommandError>> {
        self.outcomes
            .iter()
            .find(|o| o.address == address)
            .map(|o| &o.result)
    }

    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        self.outcomes
    }
}

impl<T> IntoIterator for FanOut<T> {
    type Item = Outcome<T>;
    type IntoIter = std::vec::IntoIter<Outcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}
