//! Lobby Room

mod actions;
mod events;
mod state;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RoomSettings;
use crate::countdown::CountdownState;
use crate::error::LobbyError;
use crate::lobby::{EnterResult, LobbyConfig, LobbyId, LobbySnapshot};
use crate::player::PlayerId;
use crate::provider::{LobbyProvider, RawEvent, RelayService};
use crate::readiness::ReadinessTable;

pub use events::LobbyEvent;
use state::{Command, RoomState};

/// Handle to a joined or hosted lobby.
///
/// All lobby state lives in a background task; this handle sends it
/// commands. Dropping the handle stops the task and releases the backend
/// subscription.
pub struct LobbyRoom {
    lobby_id: LobbyId,
    local_id: PlayerId,
    owner_id: PlayerId,
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    /// Event loop handle
    event_handle: Option<JoinHandle<()>>,
}

impl Drop for LobbyRoom {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl LobbyRoom {
    /// HOST: create a lobby and enter it.
    pub async fn host<P, R>(
        provider: Arc<P>,
        relay: Arc<R>,
        config: &LobbyConfig,
        settings: RoomSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LobbyEvent>), LobbyError>
    where
        P: LobbyProvider,
        R: RelayService,
    {
        let raw_events = provider.subscribe();
        let lobby_id = provider
            .host_lobby(config)
            .await
            .map_err(LobbyError::HostFailed)?;
        info!(%lobby_id, name = %config.name, "Lobby hosted");
        Self::enter(provider, relay, raw_events, settings).await
    }

    /// JOIN: enter an existing lobby by its id.
    pub async fn join_by_id<P, R>(
        provider: Arc<P>,
        relay: Arc<R>,
        lobby_id: &str,
        settings: RoomSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LobbyEvent>), LobbyError>
    where
        P: LobbyProvider,
        R: RelayService,
    {
        let raw_events = provider.subscribe();
        match provider.join_by_id(lobby_id).await {
            EnterResult::Success => Self::enter(provider, relay, raw_events, settings).await,
            result => {
                warn!(%lobby_id, %result, "Failed to join lobby");
                Err(LobbyError::Rejected(result))
            }
        }
    }

    /// JOIN: enter an existing lobby by its shareable code.
    pub async fn join_by_code<P, R>(
        provider: Arc<P>,
        relay: Arc<R>,
        code: &str,
        settings: RoomSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LobbyEvent>), LobbyError>
    where
        P: LobbyProvider,
        R: RelayService,
    {
        let raw_events = provider.subscribe();
        match provider.join_by_code(code).await {
            EnterResult::Success => Self::enter(provider, relay, raw_events, settings).await,
            result => {
                warn!(%code, %result, "Failed to join lobby");
                Err(LobbyError::Rejected(result))
            }
        }
    }

    /// Lobbies open for joining, optionally filtered by name.
    pub async fn browse<P: LobbyProvider + ?Sized>(
        provider: &P,
        name_contains: Option<&str>,
    ) -> Vec<LobbySnapshot> {
        match provider.list_available(name_contains).await {
            Ok(Some(lobbies)) => lobbies,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to list lobbies: {e}");
                Vec::new()
            }
        }
    }

    async fn enter<P, R>(
        provider: Arc<P>,
        relay: Arc<R>,
        raw_events: mpsc::UnboundedReceiver<RawEvent>,
        settings: RoomSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LobbyEvent>), LobbyError>
    where
        P: LobbyProvider,
        R: RelayService,
    {
        let snapshot = provider.refetch().await.map_err(LobbyError::Fetch)?;
        let (ui_sender, ui_receiver) = mpsc::unbounded_channel();
        let (command_sender, command_receiver) = mpsc::channel(settings.command_buffer);
        let shutdown = CancellationToken::new();

        let (state, normalizer) =
            RoomState::new(provider, relay, snapshot, ui_sender, &settings).await;
        let mut room = Self {
            lobby_id: state.snapshot.id.clone(),
            local_id: state.local_id.clone(),
            owner_id: state.closure.owner_id().clone(),
            commands: command_sender,
            shutdown: shutdown.clone(),
            event_handle: None,
        };
        info!(lobby_id = %room.lobby_id, local_id = %room.local_id, "Entered lobby");

        let handle = tokio::spawn(events::run(
            state,
            normalizer,
            raw_events,
            command_receiver,
            shutdown,
        ));
        room.event_handle = Some(handle);
        Ok((room, ui_receiver))
    }

    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }

    pub fn local_id(&self) -> &PlayerId {
        &self.local_id
    }

    /// Owner captured when the lobby was entered.
    pub fn owner_id(&self) -> &PlayerId {
        &self.owner_id
    }

    pub fn is_host(&self) -> bool {
        self.local_id == self.owner_id
    }

    /// Publish the local ready flag. Returns whether the backend accepted it.
    pub async fn set_ready(&self, ready: bool) -> bool {
        self.request(|reply| Command::SetReady { ready, reply })
            .await
            .unwrap_or(false)
    }

    /// HOST: start the session now. Does nothing for other players.
    pub async fn request_launch(&self) {
        if self.commands.send(Command::RequestLaunch).await.is_err() {
            warn!(lobby_id = %self.lobby_id, "Launch requested on a closed room");
        }
    }

    /// Leave the lobby and tear down the room.
    pub async fn leave(mut self) -> bool {
        let left = self
            .request(|reply| Command::Leave { reply })
            .await
            .unwrap_or(false);
        self.shutdown.cancel();
        if let Some(handle) = self.event_handle.take() {
            handle.await.ok();
        }
        left
    }

    /// Current canonical snapshot.
    pub async fn snapshot(&self) -> Result<LobbySnapshot, LobbyError> {
        self.request(Command::Snapshot).await
    }

    pub async fn readiness(&self) -> Result<ReadinessTable, LobbyError> {
        self.request(Command::Readiness).await
    }

    pub async fn countdown(&self) -> Result<CountdownState, LobbyError> {
        self.request(Command::Countdown).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LobbyError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| LobbyError::RoomClosed)?;
        response.await.map_err(|_| LobbyError::RoomClosed)
    }
}
