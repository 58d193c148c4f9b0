//! Background Player Watcher
//!
//! Polls a server's player list and announces joins and leaves in-game.
//!
//! ## Design
//!
//! The watcher runs as a Tokio task and:
//! 1. Checks the connection is alive (reconnecting if needed)
//! 2. Fetches `ShowPlayers` and parses it
//! 3. Diffs against the previous poll, keyed by player uid
//! 4. Logs each change and broadcasts `Player joined: <name>.` or
//!    `Player left: <name>.`
//! 5. Sleeps for the configured interval (default: 5s)
//!
//! The first successful poll only records who is online; nobody is
//! announced for being there when the watcher started.

use crate::connection::Connection;
use crate::players::{diff_players, parse_players, Player};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Configuration for the player watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Interval between polls (default: 5s)
    pub interval: Duration,

    /// Broadcast joins and leaves in-game (default: true)
    pub announce: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            announce: true,
        }
    }
}

/// A handle to a running player watcher.
///
/// When this handle is dropped, the watcher task will be stopped.
#[derive(Debug)]
pub struct PlayerWatcher {
    shutdown_tx: watch::Sender<bool>,
    roster: watch::Receiver<Vec<Player>>,
}

impl PlayerWatcher {
    /// Starts watching `conn` as a background task.
    pub fn start(conn: Connection, config: WatcherConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (roster_tx, roster_rx) = watch::channel(Vec::new());

        info!(
            server = %conn.address(),
            interval_ms = config.interval.as_millis() as u64,
            "Player watcher started"
        );
        tokio::spawn(watcher_loop(conn, config, roster_tx, shutdown_rx));

        Self {
            shutdown_tx,
            roster: roster_rx,
        }
    }

    /// Players seen in the most recent successful poll.
    pub fn roster(&self) -> Vec<Player> {
        self.roster.borrow().clone()
    }

    /// Subscribes to roster updates.
    pub fn watch_roster(&self) -> watch::Receiver<Vec<Player>> {
        self.roster.clone()
    }

    /// Stops the watcher.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for PlayerWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watcher_loop(
    conn: Connection,
    config: WatcherConfig,
    roster: watch::Sender<Vec<Player>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut previous: Option<Vec<Player>> = None;

    loop {
        if let Some(current) = poll(&conn).await {
            if let Some(before) = &previous {
                announce_changes(&conn, &config, before, &current).await;
            } else {
                debug!(server = %conn.address(), online = current.len(), "Initial roster recorded");
            }
            roster.send_replace(current.clone());
            previous = Some(current);
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!(server = %conn.address(), "Player watcher received shutdown signal");
                    return;
                }
            }
        }
    }
}

async fn poll(conn: &Connection) -> Option<Vec<Player>> {
    if !conn.check_connection().await {
        warn!(server = %conn.address(), "Connection failed, check the server address and password");
        return None;
    }

    match conn.show_players().await {
        Ok(text) => Some(parse_players(&text)),
        Err(e) => {
            warn!(server = %conn.address(), error = %e, "ShowPlayers failed");
            None
        }
    }
}

async fn announce_changes(
    conn: &Connection,
    config: &WatcherConfig,
    before: &[Player],
    current: &[Player],
) {
    let changes = diff_players(before, current);

    for player in &changes.joined {
        info!(
            server = %conn.address(),
            name = %player.name,
            steam_id = %player.steam_id,
            "Player joined"
        );
        if config.announce {
            send_announcement(conn, &format!("Player joined: {}.", player.name)).await;
        }
    }

    for player in &changes.left {
        info!(
            server = %conn.address(),
            name = %player.name,
            steam_id = %player.steam_id,
            "Player left"
        );
        if config.announce {
            send_announcement(conn, &format!("Player left: {}.", player.name)).await;
        }
    }
}

async fn send_announcement(conn: &Connection, message: &str) {
    if let Err(e) = conn.broadcast(message).await {
        warn!(server = %conn.address(), error = %e, "Broadcast failed");
    }
}
