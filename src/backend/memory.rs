//! In-process lobby service.
//!
//! One [`MemoryBackend`] plays the part of the lobby server; every client gets
//! its own [`MemoryProvider`] onto it. The backend speaks either notification
//! flavour, chosen by [`Variant`], so the same scenario can be run against
//! both.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::lobby::{
    EnterResult, KEY_CUSTOM_LOBBY_TYPE, KEY_GAME_NAME, KEY_LOBBY_CODE, KEY_LOBBY_NAME,
    KEY_LOBBY_STATUS, KEY_MAX_PLAYER, LobbyConfig, LobbyId, LobbySnapshot, LobbyStatus, LobbyType,
};
use crate::player::{DataMap, Player, PlayerId};
use crate::provider::{
    DataChanges, DiffEvent, LobbyChanges, LobbyProvider, PushEvent, RawEvent, RelayService,
};

const LOBBY_CODE_LEN: usize = 6;

/// Which notification flavour the backend emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Server-applied changes, announced by kind only.
    Push,
    /// Index-based diffs against the client's cached lobby.
    Diff,
}

#[derive(Debug, Clone)]
struct LobbyRecord {
    id: LobbyId,
    owner_id: PlayerId,
    data: DataMap,
    players: Vec<Player>,
    heartbeats: u32,
}

impl LobbyRecord {
    fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot::from_data(
            &self.id,
            self.owner_id.clone(),
            self.data.clone(),
            self.players.clone(),
        )
    }

    fn index_of(&self, player_id: &PlayerId) -> Option<usize> {
        self.players.iter().position(|p| &p.id == player_id)
    }
}

#[derive(Debug, Default)]
struct Member {
    lobby: Option<LobbyId>,
    events: Option<mpsc::UnboundedSender<RawEvent>>,
}

#[derive(Debug, Default)]
struct Shared {
    lobbies: HashMap<LobbyId, LobbyRecord>,
    members: HashMap<PlayerId, Member>,
    departures: Vec<PlayerId>,
    next_lobby: u64,
}

impl Shared {
    /// Send `event` to every current member of a lobby, forgetting
    /// subscribers that went away.
    fn broadcast(&mut self, lobby_id: &str, event: RawEvent) {
        let Some(lobby) = self.lobbies.get(lobby_id) else {
            return;
        };
        let recipients: Vec<PlayerId> = lobby.players.iter().map(|p| p.id.clone()).collect();
        for player_id in recipients {
            self.send_to(&player_id, event.clone());
        }
    }

    fn send_to(&mut self, player_id: &PlayerId, event: RawEvent) {
        let Some(member) = self.members.get_mut(player_id) else {
            return;
        };
        let closed = match &member.events {
            Some(sender) => sender.send(event).is_err(),
            None => false,
        };
        if closed {
            debug!(%player_id, "Subscriber gone, pruning");
            member.events = None;
        }
    }

    fn current_lobby(&self, player_id: &PlayerId) -> Result<&LobbyRecord> {
        let lobby_id = self
            .members
            .get(player_id)
            .and_then(|member| member.lobby.as_ref())
            .ok_or_else(|| anyhow!("{player_id} is not in a lobby"))?;
        self.lobbies
            .get(lobby_id)
            .ok_or_else(|| anyhow!("Lobby {lobby_id} no longer exists"))
    }

    fn member_lobby_mut(&mut self, lobby_id: &str, player_id: &PlayerId) -> Result<&mut LobbyRecord> {
        let lobby = self
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| anyhow!("Lobby {lobby_id} does not exist"))?;
        if lobby.index_of(player_id).is_none() {
            bail!("{player_id} is not a member of lobby {lobby_id}");
        }
        Ok(lobby)
    }

    fn delete_lobby(&mut self, lobby_id: &str) {
        if let Some(lobby) = self.lobbies.remove(lobby_id) {
            for player in &lobby.players {
                if let Some(member) = self.members.get_mut(&player.id) {
                    member.lobby = None;
                }
            }
        }
    }
}

/// Shared in-process lobby service.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    variant: Variant,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBackend {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Server-side view of a lobby.
    pub fn lobby(&self, lobby_id: &str) -> Option<LobbySnapshot> {
        let shared = self.lock().ok()?;
        shared.lobbies.get(lobby_id).map(LobbyRecord::snapshot)
    }

    pub fn heartbeats(&self, lobby_id: &str) -> u32 {
        self.lock()
            .ok()
            .and_then(|shared| shared.lobbies.get(lobby_id).map(|lobby| lobby.heartbeats))
            .unwrap_or(0)
    }

    /// Players that called `leave`, in call order.
    pub fn departures(&self) -> Vec<PlayerId> {
        self.lock()
            .map(|shared| shared.departures.clone())
            .unwrap_or_default()
    }

    /// Close a lobby from the server side, as an expiry or moderation would.
    /// Members are told before the lobby disappears.
    pub fn close_lobby(&self, lobby_id: &str) -> Result<()> {
        let mut shared = self.lock()?;
        if !shared.lobbies.contains_key(lobby_id) {
            bail!("Lobby {lobby_id} does not exist");
        }
        let deleted = match self.variant {
            Variant::Push => RawEvent::Push(PushEvent::LobbyDeleted),
            Variant::Diff => RawEvent::Diff(DiffEvent::LobbyChanged(LobbyChanges {
                lobby_deleted: true,
                ..Default::default()
            })),
        };
        shared.broadcast(lobby_id, deleted);
        shared.delete_lobby(lobby_id);
        debug!(%lobby_id, "Lobby closed by server");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| anyhow!("Lobby backend state poisoned"))
    }
}

/// One client's connection to a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryProvider {
    backend: MemoryBackend,
    player: Player,
    failing: AtomicBool,
}

impl MemoryProvider {
    pub fn new(backend: &MemoryBackend, id: &str, display_name: &str) -> Self {
        Self {
            backend: backend.clone(),
            player: Player::new(id, display_name),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every backend call from this client fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("Lobby service unavailable");
        }
        Ok(())
    }

    fn enter(&self, shared: &mut Shared, lobby_id: &str) -> EnterResult {
        let variant = self.backend.variant;
        let Some(lobby) = shared.lobbies.get_mut(lobby_id) else {
            return EnterResult::DoesNotExist;
        };
        if lobby.index_of(&self.player.id).is_some() {
            return EnterResult::Success;
        }
        let snapshot = lobby.snapshot();
        if matches!(snapshot.status, LobbyStatus::InGame | LobbyStatus::Inactive) {
            return EnterResult::NotAllowed;
        }
        if lobby.players.len() as u32 >= snapshot.max_players {
            return EnterResult::Full;
        }

        lobby.players.push(self.player.clone());
        let member = shared.members.entry(self.player.id.clone()).or_default();
        member.lobby = Some(lobby_id.to_string());

        match variant {
            Variant::Push => {
                shared.broadcast(lobby_id, RawEvent::Push(PushEvent::MemberJoined(self.player.clone())));
            }
            Variant::Diff => {
                shared.broadcast(
                    lobby_id,
                    RawEvent::Diff(DiffEvent::PlayersJoined(vec![self.player.clone()])),
                );
                let changes = LobbyChanges {
                    players_joined: vec![self.player.clone()],
                    ..Default::default()
                };
                shared.broadcast(lobby_id, RawEvent::Diff(DiffEvent::LobbyChanged(changes)));
            }
        }
        EnterResult::Success
    }
}

#[async_trait]
impl LobbyProvider for MemoryProvider {
    fn local_player_id(&self) -> PlayerId {
        self.player.id.clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<RawEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        match self.backend.lock() {
            Ok(mut shared) => {
                shared.members.entry(self.player.id.clone()).or_default().events = Some(sender);
            }
            Err(e) => warn!(player_id = %self.player.id, "Failed to subscribe: {e}"),
        }
        receiver
    }

    async fn host_lobby(&self, config: &LobbyConfig) -> Result<LobbyId> {
        self.check()?;
        let mut shared = self.backend.lock()?;
        if shared.current_lobby(&self.player.id).is_ok() {
            bail!("{} is already in a lobby", self.player.id);
        }

        shared.next_lobby += 1;
        let lobby_id = format!("lobby-{}", shared.next_lobby);
        let data = DataMap::from([
            (KEY_LOBBY_NAME.to_string(), config.name.clone()),
            (KEY_MAX_PLAYER.to_string(), config.max_players.to_string()),
            (KEY_GAME_NAME.to_string(), env!("CARGO_PKG_NAME").to_string()),
            (
                KEY_CUSTOM_LOBBY_TYPE.to_string(),
                config.lobby_type.as_str().to_string(),
            ),
            (KEY_LOBBY_CODE.to_string(), lobby_code()),
            (
                KEY_LOBBY_STATUS.to_string(),
                LobbyStatus::SettingUp.as_str().to_string(),
            ),
        ]);
        let lobby = LobbyRecord {
            id: lobby_id.clone(),
            owner_id: self.player.id.clone(),
            data,
            players: vec![self.player.clone()],
            heartbeats: 0,
        };
        let created = match self.backend.variant {
            Variant::Push => RawEvent::Push(PushEvent::LobbyCreated),
            Variant::Diff => RawEvent::Diff(DiffEvent::LobbyCreated(lobby.snapshot())),
        };
        shared.lobbies.insert(lobby_id.clone(), lobby);
        shared.members.entry(self.player.id.clone()).or_default().lobby = Some(lobby_id.clone());
        shared.send_to(&self.player.id, created);
        Ok(lobby_id)
    }

    async fn join_by_id(&self, lobby_id: &str) -> EnterResult {
        if self.check().is_err() {
            return EnterResult::Error;
        }
        match self.backend.lock() {
            Ok(mut shared) => self.enter(&mut shared, lobby_id),
            Err(_) => EnterResult::Error,
        }
    }

    async fn join_by_code(&self, code: &str) -> EnterResult {
        if self.check().is_err() {
            return EnterResult::Error;
        }
        let Ok(mut shared) = self.backend.lock() else {
            return EnterResult::Error;
        };
        let found = shared
            .lobbies
            .values()
            .find(|lobby| {
                lobby
                    .data
                    .get(KEY_LOBBY_CODE)
                    .is_some_and(|value| value.eq_ignore_ascii_case(code))
            })
            .map(|lobby| lobby.id.clone());
        match found {
            Some(lobby_id) => self.enter(&mut shared, &lobby_id),
            None => EnterResult::DoesNotExist,
        }
    }

    async fn leave(&self) -> Result<()> {
        self.check()?;
        let mut shared = self.backend.lock()?;
        shared.departures.push(self.player.id.clone());
        let Some(lobby_id) = shared
            .members
            .get_mut(&self.player.id)
            .and_then(|member| member.lobby.take())
        else {
            debug!(player_id = %self.player.id, "Leave while not in a lobby");
            return Ok(());
        };
        let Some(lobby) = shared.lobbies.get_mut(&lobby_id) else {
            return Ok(());
        };
        let Some(index) = lobby.index_of(&self.player.id) else {
            return Ok(());
        };
        let departed = lobby.players.remove(index);
        let was_owner = lobby.owner_id == departed.id;
        let empty = lobby.players.is_empty();

        match self.backend.variant {
            Variant::Push => {
                if was_owner {
                    if let Some(next) = lobby.players.first() {
                        lobby.owner_id = next.id.clone();
                    }
                }
                shared.broadcast(&lobby_id, RawEvent::Push(PushEvent::MemberLeft(departed)));
                if empty {
                    shared.delete_lobby(&lobby_id);
                }
            }
            Variant::Diff => {
                let left = LobbyChanges {
                    players_left: vec![index],
                    ..Default::default()
                };
                shared.broadcast(&lobby_id, RawEvent::Diff(DiffEvent::LobbyChanged(left)));
                if was_owner {
                    let deleted = LobbyChanges {
                        lobby_deleted: true,
                        ..Default::default()
                    };
                    shared.broadcast(&lobby_id, RawEvent::Diff(DiffEvent::LobbyChanged(deleted)));
                }
                if was_owner || empty {
                    shared.delete_lobby(&lobby_id);
                }
            }
        }
        Ok(())
    }

    async fn list_available(
        &self,
        name_contains: Option<&str>,
    ) -> Result<Option<Vec<LobbySnapshot>>> {
        self.check()?;
        let shared = self.backend.lock()?;
        let filter = name_contains.map(str::to_lowercase);
        let mut lobbies: Vec<LobbySnapshot> = shared
            .lobbies
            .values()
            .map(LobbyRecord::snapshot)
            .filter(|lobby| lobby.lobby_type == LobbyType::Public)
            .filter(|lobby| lobby.status == LobbyStatus::Active)
            .filter(|lobby| {
                filter
                    .as_ref()
                    .is_none_or(|filter| lobby.name.to_lowercase().contains(filter))
            })
            .collect();
        lobbies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Some(lobbies))
    }

    async fn refetch(&self) -> Result<LobbySnapshot> {
        self.check()?;
        let shared = self.backend.lock()?;
        Ok(shared.current_lobby(&self.player.id)?.snapshot())
    }

    async fn update_lobby_data(&self, lobby_id: &str, data: DataMap) -> Result<()> {
        self.check()?;
        let mut shared = self.backend.lock()?;
        let lobby = shared.member_lobby_mut(lobby_id, &self.player.id)?;
        if lobby.owner_id != self.player.id {
            bail!("Only the lobby owner can change lobby data");
        }
        lobby.data.extend(data.clone());

        let event = match self.backend.variant {
            Variant::Push => RawEvent::Push(PushEvent::LobbyDataChanged),
            Variant::Diff => RawEvent::Diff(DiffEvent::LobbyChanged(LobbyChanges {
                data: changes_from(data),
                ..Default::default()
            })),
        };
        shared.broadcast(lobby_id, event);
        Ok(())
    }

    async fn get_player_data(&self, player_id: &PlayerId, key: &str) -> Result<Option<String>> {
        self.check()?;
        let shared = self.backend.lock()?;
        let lobby = shared.current_lobby(&self.player.id)?;
        Ok(lobby
            .players
            .iter()
            .find(|p| &p.id == player_id)
            .and_then(|p| p.data.get(key).cloned()))
    }

    async fn update_player_data(
        &self,
        lobby_id: &str,
        player_id: &PlayerId,
        data: DataMap,
    ) -> Result<()> {
        self.check()?;
        if player_id != &self.player.id {
            bail!("Cannot change data of another player");
        }
        let mut shared = self.backend.lock()?;
        let lobby = shared.member_lobby_mut(lobby_id, player_id)?;
        let index = lobby
            .index_of(player_id)
            .ok_or_else(|| anyhow!("{player_id} is not in lobby {lobby_id}"))?;
        let player = &mut lobby.players[index];
        player.data.extend(data.clone());
        let changed = player.clone();

        let event = match self.backend.variant {
            Variant::Push => RawEvent::Push(PushEvent::MemberDataChanged(changed)),
            Variant::Diff => RawEvent::Diff(DiffEvent::PlayerDataChanged(BTreeMap::from([(
                index,
                changes_from(data),
            )]))),
        };
        shared.broadcast(lobby_id, event);
        Ok(())
    }

    async fn heartbeat(&self, lobby_id: &str) -> Result<()> {
        self.check()?;
        let mut shared = self.backend.lock()?;
        let lobby = shared.member_lobby_mut(lobby_id, &self.player.id)?;
        lobby.heartbeats += 1;
        Ok(())
    }
}

fn changes_from(data: DataMap) -> DataChanges {
    data.into_iter()
        .map(|(key, value)| (key, Some(value)))
        .collect()
}

/// Random shareable lobby code, e.g. `K3Q9ZD`.
fn lobby_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(LOBBY_CODE_LEN)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect()
}

/// Relay service double. Hands out `relay-N` addresses and records joins.
#[derive(Debug, Default)]
pub struct MemoryRelay {
    hosted: AtomicU32,
    fail_host: AtomicBool,
    joined: Mutex<Vec<String>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_host(&self, fail: bool) {
        self.fail_host.store(fail, Ordering::SeqCst);
    }

    /// Number of relays established so far.
    pub fn hosted(&self) -> u32 {
        self.hosted.load(Ordering::SeqCst)
    }

    /// Addresses joined, in order.
    pub fn joined(&self) -> Vec<String> {
        self.joined
            .lock()
            .map(|joined| joined.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelayService for MemoryRelay {
    async fn host_relay(&self) -> Result<String> {
        if self.fail_host.load(Ordering::SeqCst) {
            bail!("Relay allocation failed");
        }
        let n = self.hosted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("relay-{n}"))
    }

    async fn join_relay(&self, address: &str) -> Result<()> {
        let mut joined = self
            .joined
            .lock()
            .map_err(|_| anyhow!("Relay state poisoned"))?;
        joined.push(address.to_string());
        Ok(())
    }
}
