//! Backend capability set consumed by a lobby room.
//!
//! Backends come in two flavours that report changes in opposite ways:
//! - push-callback backends ([`PushEvent`]) notify after the server has
//!   already applied the change, so the current lobby can simply be re-read;
//! - snapshot-diff backends ([`DiffEvent`]) deliver change descriptors that
//!   must be applied to a locally cached snapshot.
//!
//! Only the [`Normalizer`](crate::normalizer::Normalizer) looks inside a
//! [`RawEvent`]; everything downstream sees canonical events.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

use crate::lobby::{EnterResult, LobbyConfig, LobbyId, LobbySnapshot};
use crate::player::{DataMap, Player, PlayerId};

/// Changes to a key/value bag. `None` marks a removed key.
pub type DataChanges = HashMap<String, Option<String>>;

/// Apply a set of key changes to a data bag.
pub fn apply_data_changes(data: &mut DataMap, changes: &DataChanges) {
    for (key, value) in changes {
        match value {
            Some(value) => {
                data.insert(key.clone(), value.clone());
            }
            None => {
                data.remove(key);
            }
        }
    }
}

/// Change notifications as delivered by a backend.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Push(PushEvent),
    Diff(DiffEvent),
}

/// Notifications from a backend that applies changes server-side.
#[derive(Debug, Clone)]
pub enum PushEvent {
    LobbyCreated,
    LobbyDataChanged,
    MemberJoined(Player),
    MemberLeft(Player),
    MemberDisconnected(Player),
    MemberDataChanged(Player),
    LobbyDeleted,
}

/// Notifications from a backend that ships diffs against a snapshot.
#[derive(Debug, Clone)]
pub enum DiffEvent {
    LobbyCreated(LobbySnapshot),
    LobbyChanged(LobbyChanges),
    PlayersJoined(Vec<Player>),
    /// Per-player key changes, indexed by position in the cached player list.
    PlayerDataChanged(BTreeMap<usize, DataChanges>),
}

/// One lobby diff. Player indices refer to the snapshot before this diff.
#[derive(Debug, Clone, Default)]
pub struct LobbyChanges {
    pub name: Option<String>,
    pub max_players: Option<u32>,
    pub owner_id: Option<PlayerId>,
    pub data: DataChanges,
    pub players_joined: Vec<Player>,
    pub players_left: Vec<usize>,
    pub player_data: BTreeMap<usize, DataChanges>,
    pub lobby_deleted: bool,
}

/// Lobby operations a backend must offer.
///
/// Calls that fail return an error; the room decides how to degrade.
#[async_trait]
pub trait LobbyProvider: Send + Sync + 'static {
    /// Identity of the local player on this backend.
    fn local_player_id(&self) -> PlayerId;

    /// Start receiving change notifications for the lobby this provider is in.
    ///
    /// Dropping the receiver ends the subscription.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RawEvent>;

    /// Create a lobby owned by the local player.
    async fn host_lobby(&self, config: &LobbyConfig) -> Result<LobbyId>;

    async fn join_by_id(&self, lobby_id: &str) -> EnterResult;

    async fn join_by_code(&self, code: &str) -> EnterResult;

    /// Leave the current lobby.
    async fn leave(&self) -> Result<()>;

    /// Public, active lobbies, optionally filtered by a name fragment.
    async fn list_available(&self, name_contains: Option<&str>)
    -> Result<Option<Vec<LobbySnapshot>>>;

    /// Re-read the current lobby from the backend.
    async fn refetch(&self) -> Result<LobbySnapshot>;

    async fn update_lobby_data(&self, lobby_id: &str, data: DataMap) -> Result<()>;

    async fn get_player_data(&self, player_id: &PlayerId, key: &str) -> Result<Option<String>>;

    async fn update_player_data(
        &self,
        lobby_id: &str,
        player_id: &PlayerId,
        data: DataMap,
    ) -> Result<()>;

    /// Keep a hosted lobby alive. Backends that do not expire lobbies need not override this.
    async fn heartbeat(&self, _lobby_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Session relay that the host creates and joiners connect to.
#[async_trait]
pub trait RelayService: Send + Sync + 'static {
    /// Establish a relay and return the address joiners use.
    async fn host_relay(&self) -> Result<String>;

    async fn join_relay(&self, address: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_changes_insert_and_remove_keys() {
        let mut data = DataMap::new();
        data.insert("a".to_string(), "1".to_string());
        data.insert("b".to_string(), "2".to_string());

        let mut changes = DataChanges::new();
        changes.insert("a".to_string(), Some("3".to_string()));
        changes.insert("b".to_string(), None);
        changes.insert("c".to_string(), Some("4".to_string()));
        apply_data_changes(&mut data, &changes);

        assert_eq!(data.get("a").map(String::as_str), Some("3"));
        assert!(!data.contains_key("b"));
        assert_eq!(data.get("c").map(String::as_str), Some("4"));
    }
}
