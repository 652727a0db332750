//! State owned by a room's event loop

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::LobbyEvent;
use crate::closure::ClosureDetector;
use crate::config::RoomSettings;
use crate::countdown::{Countdown, CountdownDisplay, CountdownState};
use crate::handoff::RelayHandoff;
use crate::lobby::LobbySnapshot;
use crate::normalizer::Normalizer;
use crate::player::PlayerId;
use crate::provider::{LobbyProvider, RelayService};
use crate::readiness::{ReadinessTable, fetch_ready};

/// Requests from the room handle to its event loop.
#[derive(Debug)]
pub(crate) enum Command {
    SetReady {
        ready: bool,
        reply: oneshot::Sender<bool>,
    },
    RequestLaunch,
    Leave {
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<LobbySnapshot>),
    Readiness(oneshot::Sender<ReadinessTable>),
    Countdown(oneshot::Sender<CountdownState>),
}

/// Canonical lobby state for one local client.
///
/// Only the room's event loop touches this, one event at a time.
pub(crate) struct RoomState<P, R> {
    pub(crate) provider: Arc<P>,
    pub(crate) relay: Arc<R>,
    pub(crate) local_id: PlayerId,
    pub(crate) snapshot: LobbySnapshot,
    pub(crate) readiness: ReadinessTable,
    pub(crate) countdown: Countdown,
    pub(crate) closure: ClosureDetector,
    pub(crate) handoff: RelayHandoff,
    pub(crate) heartbeat_interval: Duration,
    ui: mpsc::UnboundedSender<LobbyEvent>,
    finished: bool,
}

impl<P: LobbyProvider, R: RelayService> RoomState<P, R> {
    /// Build the state for a freshly entered lobby, along with the
    /// normalizer that will feed it.
    pub(crate) async fn new(
        provider: Arc<P>,
        relay: Arc<R>,
        snapshot: LobbySnapshot,
        ui: mpsc::UnboundedSender<LobbyEvent>,
        settings: &RoomSettings,
    ) -> (Self, Normalizer) {
        let local_id = provider.local_player_id();
        let mut readiness = ReadinessTable::from_snapshot(&snapshot);
        for player in &snapshot.players {
            let ready = fetch_ready(provider.as_ref(), &player.id).await;
            readiness.set(&player.id, ready);
        }

        let closure = ClosureDetector::new(snapshot.owner_id.clone(), local_id.clone());
        let mut state = Self {
            provider,
            relay,
            local_id,
            snapshot: snapshot.clone(),
            readiness,
            countdown: Countdown::new(settings.countdown_ticks, settings.tick_period),
            closure,
            handoff: RelayHandoff::new(),
            heartbeat_interval: settings.heartbeat_interval,
            ui,
            finished: false,
        };
        if state.is_host() {
            state.promote_to_active().await;
        }
        let normalizer = Normalizer::new(state.snapshot.clone());
        (state, normalizer)
    }

    /// Whether the local client owns the lobby, judged by the owner captured
    /// on entry.
    pub(crate) fn is_host(&self) -> bool {
        self.closure.owner_id() == &self.local_id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }

    /// Forward a notification to the presentation layer. Never waits on a
    /// slow reader.
    pub(crate) async fn notify(&self, event: LobbyEvent) {
        if self.ui.send(event).is_err() {
            debug!(lobby_id = %self.snapshot.id, "Presentation channel closed");
        }
    }

    pub(crate) async fn cancel_countdown(&mut self) {
        if let Some(display) = self.countdown.cancel() {
            debug!(lobby_id = %self.snapshot.id, "Countdown cancelled");
            self.notify(LobbyEvent::Countdown(display)).await;
        }
    }

    /// Start the countdown once everyone is ready. A running countdown is
    /// left alone.
    pub(crate) async fn check_launch(&mut self) {
        if !self.readiness.should_launch() || self.countdown.is_running() {
            return;
        }
        debug!(lobby_id = %self.snapshot.id, "All players ready, starting countdown");
        let display = self.countdown.trigger_start();
        self.notify(LobbyEvent::Countdown(display)).await;
    }

    /// Record a ready flag and tell the presentation layer if it changed.
    pub(crate) async fn record_ready(&mut self, player_id: &PlayerId, ready: bool) -> bool {
        let changed = self.readiness.set(player_id, ready);
        if changed {
            self.notify(LobbyEvent::ReadinessChanged {
                player_id: player_id.clone(),
                ready,
            })
            .await;
        }
        changed
    }

    pub(crate) async fn show_countdown(&self, display: CountdownDisplay) {
        self.notify(LobbyEvent::Countdown(display)).await;
    }
}
