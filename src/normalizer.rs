//! Normalize backend notifications into canonical lobby events.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::lobby::{KEY_CUSTOM_LOBBY_TYPE, KEY_LOBBY_NAME, KEY_MAX_PLAYER, LobbySnapshot};
use crate::player::{Player, PlayerId};
use crate::provider::{
    DataChanges, DiffEvent, LobbyChanges, LobbyProvider, PushEvent, RawEvent, apply_data_changes,
};

/// Backend-independent lobby notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    LobbyCreated(LobbySnapshot),
    LobbyUpdated(LobbySnapshot),
    PlayerJoined(LobbySnapshot, Player),
    PlayerLeft(LobbySnapshot, Player),
    PlayerDataChanged(LobbySnapshot, Player),
    LobbyClosed,
}

/// Receiver of canonical events. Each event is fully handled before the
/// normalizer continues with the rest of the raw notification.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: CanonicalEvent);
}

/// Owns the cached lobby snapshot and turns raw notifications into
/// [`CanonicalEvent`]s.
#[derive(Debug)]
pub struct Normalizer {
    cache: LobbySnapshot,
    closed: bool,
}

impl Normalizer {
    pub fn new(snapshot: LobbySnapshot) -> Self {
        Self {
            cache: snapshot,
            closed: false,
        }
    }

    pub fn snapshot(&self) -> &LobbySnapshot {
        &self.cache
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Classify one raw notification, updating the cache and emitting the
    /// resulting canonical events into `sink`.
    pub async fn normalize<P, S>(&mut self, raw: RawEvent, provider: &P, sink: &mut S)
    where
        P: LobbyProvider + ?Sized,
        S: EventSink,
    {
        if self.closed {
            debug!(lobby_id = %self.cache.id, "Dropping event for closed lobby");
            return;
        }
        match raw {
            RawEvent::Push(event) => self.push(event, provider, sink).await,
            RawEvent::Diff(event) => self.diff(event, sink).await,
        }
    }

    async fn push<P, S>(&mut self, event: PushEvent, provider: &P, sink: &mut S)
    where
        P: LobbyProvider + ?Sized,
        S: EventSink,
    {
        match event {
            PushEvent::LobbyCreated => {
                self.resync(provider).await;
                sink.emit(CanonicalEvent::LobbyCreated(self.cache.clone()))
                    .await;
            }
            PushEvent::LobbyDataChanged => {
                self.resync(provider).await;
                sink.emit(CanonicalEvent::LobbyUpdated(self.cache.clone()))
                    .await;
            }
            PushEvent::MemberJoined(player) => {
                if self.cache.contains(&player.id) {
                    debug!(player_id = %player.id, "Join for a known player, ignoring");
                    return;
                }
                let joined = self
                    .resync(provider)
                    .await
                    .and_then(|fresh| fresh.player(&player.id).cloned())
                    .unwrap_or(player);
                self.cache.players.push(joined.clone());
                sink.emit(CanonicalEvent::PlayerJoined(self.cache.clone(), joined))
                    .await;
            }
            PushEvent::MemberLeft(player) | PushEvent::MemberDisconnected(player) => {
                // Capture display data before the re-sync drops the player.
                let Some(departed) = self.cache.player(&player.id).cloned() else {
                    debug!(player_id = %player.id, "Leave for an unknown player, ignoring");
                    return;
                };
                self.resync(provider).await;
                self.cache.players.retain(|p| p.id != departed.id);
                sink.emit(CanonicalEvent::PlayerLeft(self.cache.clone(), departed))
                    .await;
            }
            PushEvent::MemberDataChanged(player) => {
                self.resync(provider).await;
                match self.cache.player(&player.id).cloned() {
                    Some(changed) => {
                        sink.emit(CanonicalEvent::PlayerDataChanged(
                            self.cache.clone(),
                            changed,
                        ))
                        .await
                    }
                    None => debug!(player_id = %player.id, "Data change for unknown player"),
                }
            }
            PushEvent::LobbyDeleted => self.close(sink).await,
        }
    }

    async fn diff<S: EventSink>(&mut self, event: DiffEvent, sink: &mut S) {
        match event {
            DiffEvent::LobbyCreated(snapshot) => {
                let status = if snapshot.id == self.cache.id {
                    self.cache.status.merge(snapshot.status)
                } else {
                    snapshot.status
                };
                self.cache = snapshot;
                self.cache.status = status;
                sink.emit(CanonicalEvent::LobbyCreated(self.cache.clone()))
                    .await;
            }
            DiffEvent::PlayersJoined(players) => self.add_players(players, sink).await,
            DiffEvent::PlayerDataChanged(changes) => {
                for (index, data) in changes {
                    let Some(player) = self.cache.players.get_mut(index) else {
                        debug!(index, "Player data change for unknown index, dropping");
                        continue;
                    };
                    apply_data_changes(&mut player.data, &data);
                    let changed = player.clone();
                    sink.emit(CanonicalEvent::PlayerDataChanged(
                        self.cache.clone(),
                        changed,
                    ))
                    .await;
                }
            }
            DiffEvent::LobbyChanged(changes) => self.apply_changes(changes, sink).await,
        }
    }

    async fn apply_changes<S: EventSink>(&mut self, changes: LobbyChanges, sink: &mut S) {
        let LobbyChanges {
            name,
            max_players,
            owner_id,
            data,
            players_joined,
            players_left,
            player_data,
            lobby_deleted,
        } = changes;

        // Resolve per-player changes against the pre-diff indices.
        let player_data: Vec<(PlayerId, DataChanges)> = player_data
            .into_iter()
            .filter_map(|(index, data)| {
                self.cache
                    .players
                    .get(index)
                    .map(|player| (player.id.clone(), data))
            })
            .collect();

        // Departures are announced while the leaving players are still cached.
        let mut removed = BTreeSet::new();
        for index in players_left {
            if removed.contains(&index) {
                continue;
            }
            let Some(player) = self.cache.players.get(index).cloned() else {
                debug!(index, "Leave for unknown index, dropping");
                continue;
            };
            removed.insert(index);
            sink.emit(CanonicalEvent::PlayerLeft(self.cache.clone(), player))
                .await;
        }
        for index in removed.iter().rev() {
            self.cache.players.remove(*index);
        }

        apply_data_changes(&mut self.cache.data, &data);
        if let Some(name) = name.or_else(|| data.get(KEY_LOBBY_NAME).cloned().flatten()) {
            self.cache.name = name;
        }
        if let Some(max_players) = max_players.or_else(|| {
            data.get(KEY_MAX_PLAYER)
                .cloned()
                .flatten()
                .and_then(|value| value.parse().ok())
        }) {
            self.cache.max_players = max_players;
        }
        if let Some(lobby_type) = data
            .get(KEY_CUSTOM_LOBBY_TYPE)
            .cloned()
            .flatten()
            .and_then(|value| value.parse().ok())
        {
            self.cache.lobby_type = lobby_type;
        }
        if let Some(owner_id) = owner_id {
            self.cache.owner_id = owner_id;
        }
        self.cache.sync_status();

        for (player_id, data) in &player_data {
            if let Some(player) = self.cache.player_mut(player_id) {
                apply_data_changes(&mut player.data, data);
            }
        }

        self.add_players(players_joined, sink).await;

        if lobby_deleted {
            self.close(sink).await;
        } else {
            sink.emit(CanonicalEvent::LobbyUpdated(self.cache.clone()))
                .await;
        }
    }

    async fn add_players<S: EventSink>(&mut self, players: Vec<Player>, sink: &mut S) {
        let mut seen = HashSet::new();
        for player in players {
            if self.cache.contains(&player.id) || !seen.insert(player.id.clone()) {
                continue;
            }
            self.cache.players.push(player.clone());
            sink.emit(CanonicalEvent::PlayerJoined(self.cache.clone(), player))
                .await;
        }
    }

    async fn close<S: EventSink>(&mut self, sink: &mut S) {
        if self.closed {
            return;
        }
        self.closed = true;
        sink.emit(CanonicalEvent::LobbyClosed).await;
    }

    /// Refresh the cache from the backend's current lobby and return what
    /// the backend reported.
    ///
    /// Membership stays as the cache knows it: the backend may already reflect
    /// joins and leaves whose notifications are still queued, and those are
    /// applied when their own notification is handled. On failure the cache
    /// is kept.
    async fn resync<P: LobbyProvider + ?Sized>(&mut self, provider: &P) -> Option<LobbySnapshot> {
        let fresh = match provider.refetch().await {
            Ok(fresh) if fresh.id == self.cache.id => fresh,
            Ok(fresh) => {
                warn!(expected = %self.cache.id, got = %fresh.id, "Re-sync returned another lobby");
                return None;
            }
            Err(e) => {
                warn!(lobby_id = %self.cache.id, "Failed to re-sync lobby: {e}");
                return None;
            }
        };
        let players = self
            .cache
            .players
            .iter()
            .map(|cached| fresh.player(&cached.id).cloned().unwrap_or_else(|| cached.clone()))
            .collect();
        let status = self.cache.status.merge(fresh.status);
        self.cache = LobbySnapshot {
            players,
            status,
            ..fresh.clone()
        };
        Some(fresh)
    }
}
