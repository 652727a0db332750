//! Canonical lobby model

use std::{fmt::Display, str::FromStr};

use crate::player::{DataMap, Player, PlayerId};

// --- Lobby Data Keys ---
pub const KEY_LOBBY_NAME: &str = "lobbyname";
pub const KEY_MAX_PLAYER: &str = "maxplayer";
pub const KEY_GAME_NAME: &str = "game";
pub const KEY_CUSTOM_LOBBY_TYPE: &str = "customlobbytype";
pub const KEY_LOBBY_CODE: &str = "lobbycode";
/// Relay address published by the host once the session starts.
pub const KEY_START_GAME: &str = "startgame";
pub const KEY_LOBBY_STATUS: &str = "lobbystatus";

pub type LobbyId = String;

/// Lifecycle of a lobby. Only ever moves forward; `Inactive` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LobbyStatus {
    SettingUp,
    Active,
    InGame,
    Inactive,
}

impl LobbyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LobbyStatus::SettingUp => "SETTING_UP",
            LobbyStatus::Active => "ACTIVE",
            LobbyStatus::InGame => "INGAME",
            LobbyStatus::Inactive => "INACTIVE",
        }
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_advance_to(&self, next: LobbyStatus) -> bool {
        next > *self
    }

    /// Merge an observed status into the current one without moving backwards.
    pub fn merge(self, observed: LobbyStatus) -> LobbyStatus {
        self.max(observed)
    }
}

impl Display for LobbyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LobbyStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETTING_UP" => Ok(LobbyStatus::SettingUp),
            "ACTIVE" => Ok(LobbyStatus::Active),
            "INGAME" => Ok(LobbyStatus::InGame),
            "INACTIVE" => Ok(LobbyStatus::Inactive),
            other => Err(anyhow::anyhow!("Unknown lobby status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LobbyType {
    Private,
    FriendsOnly,
    #[default]
    Public,
    Invisible,
    PrivateUnique,
}

impl LobbyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LobbyType::Private => "Private",
            LobbyType::FriendsOnly => "FriendsOnly",
            LobbyType::Public => "Public",
            LobbyType::Invisible => "Invisible",
            LobbyType::PrivateUnique => "PrivateUnique",
        }
    }
}

impl FromStr for LobbyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Private" => Ok(LobbyType::Private),
            "FriendsOnly" => Ok(LobbyType::FriendsOnly),
            "Public" => Ok(LobbyType::Public),
            "Invisible" => Ok(LobbyType::Invisible),
            "PrivateUnique" => Ok(LobbyType::PrivateUnique),
            other => Err(anyhow::anyhow!("Unknown lobby type '{other}'")),
        }
    }
}

/// Settings a host chooses when creating a lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyConfig {
    pub name: String,
    pub max_players: u32,
    pub lobby_type: LobbyType,
}

impl LobbyConfig {
    pub fn new(name: &str, max_players: u32, lobby_type: LobbyType) -> Self {
        Self {
            name: name.to_string(),
            max_players,
            lobby_type,
        }
    }
}

/// Outcome of trying to enter a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterResult {
    Success,
    DoesNotExist,
    NotAllowed,
    Full,
    Error,
    Banned,
    Limited,
    ClanDisabled,
    CommunityBan,
    MemberBlockedYou,
    YouBlockedMember,
    RatelimitExceeded,
}

impl Display for EnterResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            EnterResult::Success => "joined",
            EnterResult::DoesNotExist => "lobby does not exist",
            EnterResult::NotAllowed => "not allowed to join",
            EnterResult::Full => "lobby is full",
            EnterResult::Error => "backend error",
            EnterResult::Banned => "banned from lobby",
            EnterResult::Limited => "account is limited",
            EnterResult::ClanDisabled => "clan is disabled",
            EnterResult::CommunityBan => "community banned",
            EnterResult::MemberBlockedYou => "a member blocked you",
            EnterResult::YouBlockedMember => "you blocked a member",
            EnterResult::RatelimitExceeded => "rate limit exceeded",
        };
        write!(f, "{reason}")
    }
}

/// The lobby as known at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySnapshot {
    pub id: LobbyId,
    pub name: String,
    pub owner_id: PlayerId,
    pub max_players: u32,
    pub lobby_type: LobbyType,
    pub status: LobbyStatus,
    pub data: DataMap,
    pub players: Vec<Player>,
}

impl LobbySnapshot {
    /// Build a snapshot from raw lobby data, deriving the mirrored fields.
    pub fn from_data(id: &str, owner_id: PlayerId, data: DataMap, players: Vec<Player>) -> Self {
        let name = data.get(KEY_LOBBY_NAME).cloned().unwrap_or_default();
        let max_players = data
            .get(KEY_MAX_PLAYER)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let lobby_type = data
            .get(KEY_CUSTOM_LOBBY_TYPE)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();
        let status = data
            .get(KEY_LOBBY_STATUS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(LobbyStatus::SettingUp);
        Self {
            id: id.to_string(),
            name,
            owner_id,
            max_players,
            lobby_type,
            status,
            data,
            players,
        }
    }

    /// Re-derive `status` from the status key, never moving backwards.
    pub fn sync_status(&mut self) {
        if let Some(observed) = self
            .data
            .get(KEY_LOBBY_STATUS)
            .and_then(|value| value.parse::<LobbyStatus>().ok())
        {
            self.status = self.status.merge(observed);
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.data.get(KEY_LOBBY_CODE).map(String::as_str)
    }

    /// The published relay address, if the host has started the session.
    pub fn launch_address(&self) -> Option<&str> {
        self.data
            .get(KEY_START_GAME)
            .map(String::as_str)
            .filter(|address| !address.is_empty())
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.player(id).is_some()
    }

    pub fn is_owner(&self, id: &PlayerId) -> bool {
        &self.owner_id == id
    }
}

impl Display for LobbySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "'{}' [{}] {}/{} ({})",
            self.name,
            self.id,
            self.players.len(),
            self.max_players,
            self.status
        )?;
        for player in &self.players {
            let marker = if self.is_owner(&player.id) { "*" } else { " " };
            writeln!(f, "{marker} {} ({})", player, player.id)?;
        }
        Ok(())
    }
}
