//! Player List Parsing
//!
//! `ShowPlayers` answers with CSV text:
//!
//! ```text
//! name,playeruid,steamid
//! Ariz,1234567890,76561198000000001
//! Leo,2233445566,76561198000000002
//! ```
//!
//! Names may contain commas, so each record is split from the right.

use std::collections::BTreeMap;

/// One connected player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Player {
    pub name: String,
    pub player_uid: String,
    pub steam_id: String,
}

/// Parses the text returned by `ShowPlayers`.
///
/// Everything up to and including the `steamid` header token is skipped.
/// Blank lines and lines without three fields are ignored.
pub fn parse_players(text: &str) -> Vec<Player> {
    let body = match find_header_end(text) {
        Some(end) => &text[end..],
        None => text,
    };

    body.lines()
        .filter_map(|line| {
            let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            if line.is_empty() {
                return None;
            }
            let mut fields = line.rsplitn(3, ',');
            let steam_id = fields.next()?.trim();
            let player_uid = fields.next()?.trim();
            let name = fields.next()?.trim();
            if name.is_empty() && player_uid.is_empty() {
                return None;
            }
            Some(Player {
                name: name.to_string(),
                player_uid: player_uid.to_string(),
                steam_id: steam_id.to_string(),
            })
        })
        .collect()
}

/// Byte offset just past the case-insensitive `steamid` header token.
fn find_header_end(text: &str) -> Option<usize> {
    const HEADER: &str = "steamid";
    text.to_ascii_lowercase()
        .find(HEADER)
        .map(|start| start + HEADER.len())
}

/// Players that appeared and disappeared between two polls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerChanges {
    pub joined: Vec<Player>,
    pub left: Vec<Player>,
}

impl PlayerChanges {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Compares two player lists, keyed by player uid.
pub fn diff_players(previous: &[Player], current: &[Player]) -> PlayerChanges {
    let before: BTreeMap<&str, &Player> =
        previous.iter().map(|p| (p.player_uid.as_str(), p)).collect();
    let after: BTreeMap<&str, &Player> =
        current.iter().map(|p| (p.player_uid.as_str(), p)).collect();

    PlayerChanges {
        joined: after
            .iter()
            .filter(|(uid, _)| !before.contains_key(*uid))
            .map(|(_, p)| (*p).clone())
            .collect(),
        left: before
            .iter()
            .filter(|(uid, _)| !after.contains_key(*uid))
            .map(|(_, p)| (*p).clone())
            .collect(),
    }
}
