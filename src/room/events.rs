use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::closure::Closure;
use crate::countdown::{CountdownDisplay, CountdownStep};
use crate::lobby::LobbySnapshot;
use crate::normalizer::{CanonicalEvent, EventSink, Normalizer};
use crate::player::{Player, PlayerId};
use crate::provider::{LobbyProvider, RawEvent, RelayService};
use crate::readiness::fetch_ready;
use crate::room::state::{Command, RoomState};

/// Public events the room sends to the lobby UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    LobbyCreated(LobbySnapshot),
    LobbyUpdated(LobbySnapshot),
    PlayerJoined(LobbySnapshot, Player),
    PlayerLeft(LobbySnapshot, Player),
    PlayerDataChanged(LobbySnapshot, Player),
    ReadinessChanged { player_id: PlayerId, ready: bool },
    Countdown(CountdownDisplay),
    /// HOST: the relay is up and its address published.
    SessionStarted { address: String },
    /// JOINER: connected to the host's relay.
    SessionJoined { address: String },
    /// The original host left or the lobby was deleted.
    SessionClosed,
    Error(String),
}

/// Drive a room until it is left, closed or shut down.
pub(crate) async fn run<P, R>(
    mut state: RoomState<P, R>,
    mut normalizer: Normalizer,
    mut raw_events: mpsc::UnboundedReceiver<RawEvent>,
    mut commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) where
    P: LobbyProvider,
    R: RelayService,
{
    let hosting = state.is_host();
    let period = state.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let provider = state.provider.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            raw = raw_events.recv() => match raw {
                Some(raw) => normalizer.normalize(raw, provider.as_ref(), &mut state).await,
                None => {
                    debug!(lobby_id = %state.snapshot.id, "Provider subscription ended");
                    break;
                }
            },
            Some(command) = commands.recv() => state.handle_command(command).await,
            step = state.countdown.tick() => state.on_countdown(step).await,
            _ = heartbeat.tick(), if hosting => state.heartbeat().await,
        }
        if state.is_finished() {
            break;
        }
    }
    state.countdown.cancel();
    debug!(lobby_id = %state.snapshot.id, "Room event loop stopped");
}

#[async_trait]
impl<P: LobbyProvider, R: RelayService> EventSink for RoomState<P, R> {
    async fn emit(&mut self, event: CanonicalEvent) {
        if self.is_finished() {
            return;
        }
        match event {
            CanonicalEvent::LobbyCreated(snapshot) => {
                self.snapshot = snapshot.clone();
                self.notify(LobbyEvent::LobbyCreated(snapshot)).await;
            }
            CanonicalEvent::LobbyUpdated(snapshot) => {
                self.snapshot = snapshot.clone();
                self.notify(LobbyEvent::LobbyUpdated(snapshot)).await;
                self.consume_session().await;
            }
            CanonicalEvent::PlayerJoined(snapshot, player) => {
                self.player_joined(snapshot, player).await;
            }
            CanonicalEvent::PlayerLeft(snapshot, player) => {
                self.player_left(snapshot, player).await;
            }
            CanonicalEvent::PlayerDataChanged(snapshot, player) => {
                self.snapshot = snapshot.clone();
                self.notify(LobbyEvent::PlayerDataChanged(snapshot, player.clone()))
                    .await;
                let ready = fetch_ready(self.provider.as_ref(), &player.id).await;
                if self.record_ready(&player.id, ready).await && !ready {
                    self.cancel_countdown().await;
                }
                self.check_launch().await;
            }
            CanonicalEvent::LobbyClosed => {
                if let Some(closure) = self.closure.lobby_closed() {
                    self.close(closure).await;
                }
            }
        }
    }
}

impl<P: LobbyProvider, R: RelayService> RoomState<P, R> {
    async fn player_joined(&mut self, snapshot: LobbySnapshot, player: Player) {
        info!(lobby_id = %snapshot.id, player_id = %player.id, "Player joined");
        self.snapshot = snapshot.clone();
        self.readiness.insert_joined(&player.id);
        self.cancel_countdown().await;
        self.notify(LobbyEvent::PlayerJoined(snapshot, player.clone()))
            .await;

        // The join can race the joiner's own ready write.
        let ready = fetch_ready(self.provider.as_ref(), &player.id).await;
        self.record_ready(&player.id, ready).await;

        if player.id != self.local_id {
            self.reset_own_ready().await;
        }
    }

    async fn player_left(&mut self, snapshot: LobbySnapshot, player: Player) {
        info!(lobby_id = %snapshot.id, player_id = %player.id, "Player left");
        self.snapshot = snapshot.clone();
        self.readiness.remove(&player.id);
        self.cancel_countdown().await;
        self.notify(LobbyEvent::PlayerLeft(snapshot, player.clone()))
            .await;

        match self.closure.player_left(&player.id) {
            Some(closure) => self.close(closure).await,
            None => self.reset_own_ready().await,
        }
    }

    /// Tear the session down after host loss. Runs at most once.
    async fn close(&mut self, closure: Closure) {
        warn!(lobby_id = %self.snapshot.id, owner_id = %self.closure.owner_id(), "Session closed");
        self.countdown.cancel();
        if closure == Closure::LeaveAndNotify {
            if let Err(e) = self.provider.leave().await {
                warn!(lobby_id = %self.snapshot.id, "Failed to leave closed lobby: {e}");
            }
        }
        self.notify(LobbyEvent::SessionClosed).await;
        self.finish();
    }

    /// JOINER: connect to the host's relay the first time its address shows up.
    async fn consume_session(&mut self) {
        let Some(address) = self.handoff.consume(&self.snapshot, &self.local_id) else {
            return;
        };
        self.countdown.cancel();
        match self.relay.join_relay(&address).await {
            Ok(()) => {
                info!(lobby_id = %self.snapshot.id, %address, "Joined session");
                self.notify(LobbyEvent::SessionJoined { address }).await;
            }
            Err(e) => {
                warn!(lobby_id = %self.snapshot.id, %address, "Failed to join session: {e}");
                self.notify(LobbyEvent::Error(format!("Failed to join session: {e}")))
                    .await;
            }
        }
    }

    pub(crate) async fn on_countdown(&mut self, step: CountdownStep) {
        match step {
            CountdownStep::Tick(remaining) => {
                self.show_countdown(CountdownDisplay::Remaining(remaining))
                    .await;
            }
            CountdownStep::Fired => {
                self.show_countdown(CountdownDisplay::Remaining(0)).await;
                self.start_session().await;
            }
        }
    }
}
