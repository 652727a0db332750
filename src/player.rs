use std::{collections::HashMap, fmt::Display};

/// Player data key holding the ready flag as a `True`/`False` string.
pub const KEY_PLAYER_READY: &str = "playerready";

/// String-keyed data bag shared through the backend.
pub type DataMap = HashMap<String, String>;

/// Stable identity of a player, unique within a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A lobby member as seen through the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub data: DataMap,
}

impl Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, display_name: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.to_string(),
            data: DataMap::new(),
        }
    }

    /// The ready flag as currently carried in this player's data bag.
    pub fn is_ready(&self) -> bool {
        self.data
            .get(KEY_PLAYER_READY)
            .is_some_and(|value| parse_ready(value))
    }
}

/// Encode a ready flag the way every client writes it.
pub fn ready_value(ready: bool) -> String {
    let value = if ready { "True" } else { "False" };
    value.to_string()
}

/// Parse a ready flag. Unknown values read as not ready.
pub fn parse_ready(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
