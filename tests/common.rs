#![allow(dead_code)]

use lobby_room::backend::memory::{MemoryBackend, MemoryProvider, MemoryRelay, Variant};
use lobby_room::*;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use tracing_subscriber::EnvFilter;

/// One participant: its room, its UI event stream and its backend connection.
pub struct Client {
    pub room: LobbyRoom,
    pub events: mpsc::UnboundedReceiver<LobbyEvent>,
    pub provider: Arc<MemoryProvider>,
}

impl Client {
    pub fn id(&self) -> PlayerId {
        self.room.local_id().clone()
    }
}

pub struct TestLobby {
    pub backend: MemoryBackend,
    pub relay: Arc<MemoryRelay>,
    pub lobby_id: String,
    pub host: Client,
    pub guests: Vec<Client>,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub async fn await_event(events: &mut mpsc::UnboundedReceiver<LobbyEvent>) -> anyhow::Result<LobbyEvent> {
    let duration = Duration::from_secs(2);
    tokio::time::timeout(duration, events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("Event channel closed"))
}

/// Skip events until one matches.
pub async fn await_matching(
    events: &mut mpsc::UnboundedReceiver<LobbyEvent>,
    wanted: impl Fn(&LobbyEvent) -> bool,
) -> anyhow::Result<LobbyEvent> {
    loop {
        let event = await_event(events).await?;
        if wanted(&event) {
            return Ok(event);
        }
    }
}

/// Everything already queued, without waiting.
pub fn drain(events: &mut mpsc::UnboundedReceiver<LobbyEvent>) -> Vec<LobbyEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Let every room finish what it is doing. With paused time the sleep only
/// completes once all other tasks are idle.
pub async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

pub async fn host_client(
    backend: &MemoryBackend,
    relay: &Arc<MemoryRelay>,
    id: &str,
    config: &LobbyConfig,
) -> anyhow::Result<Client> {
    let provider = Arc::new(MemoryProvider::new(backend, id, id));
    let (room, events) = LobbyRoom::host(
        provider.clone(),
        relay.clone(),
        config,
        RoomSettings::default(),
    )
    .await?;
    Ok(Client {
        room,
        events,
        provider,
    })
}

pub async fn join_client(
    backend: &MemoryBackend,
    relay: &Arc<MemoryRelay>,
    lobby_id: &str,
    id: &str,
) -> anyhow::Result<Client> {
    let provider = Arc::new(MemoryProvider::new(backend, id, id));
    let (room, events) = LobbyRoom::join_by_id(
        provider.clone(),
        relay.clone(),
        lobby_id,
        RoomSettings::default(),
    )
    .await?;
    Ok(Client {
        room,
        events,
        provider,
    })
}

/// A hosted lobby "Test Lobby" with `guests` joined one after another.
pub async fn setup_lobby(variant: Variant, guests: &[&str]) -> anyhow::Result<TestLobby> {
    init_tracing();
    let backend = MemoryBackend::new(variant);
    let relay = Arc::new(MemoryRelay::new());
    let config = LobbyConfig::new("Test Lobby", 8, LobbyType::Public);
    let host = host_client(&backend, &relay, "host", &config).await?;
    let lobby_id = host.room.lobby_id().to_string();

    let mut joined = Vec::new();
    for guest in guests {
        joined.push(join_client(&backend, &relay, &lobby_id, guest).await?);
        settle().await;
    }
    Ok(TestLobby {
        backend,
        relay,
        lobby_id,
        host,
        guests: joined,
    })
}

/// Ready every client in turn, settling in between.
pub async fn ready_all(clients: &[&Client]) {
    for client in clients {
        assert!(client.room.set_ready(true).await);
        settle().await;
    }
}
