use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::lobby::{KEY_LOBBY_STATUS, KEY_START_GAME, LobbyStatus};
use crate::player::{DataMap, KEY_PLAYER_READY, ready_value};
use crate::provider::{LobbyProvider, RelayService};
use crate::room::LobbyEvent;
use crate::room::state::{Command, RoomState};

impl<P: LobbyProvider, R: RelayService> RoomState<P, R> {
    pub(crate) async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetReady { ready, reply } => {
                let accepted = self.set_ready(ready).await;
                reply.send(accepted).ok();
            }
            Command::RequestLaunch => {
                if self.is_host() {
                    self.start_session().await;
                } else {
                    debug!(lobby_id = %self.snapshot.id, "Only the host can launch");
                }
            }
            Command::Leave { reply } => {
                let left = self.leave().await;
                reply.send(left).ok();
            }
            Command::Snapshot(reply) => {
                reply.send(self.snapshot.clone()).ok();
            }
            Command::Readiness(reply) => {
                reply.send(self.readiness.clone()).ok();
            }
            Command::Countdown(reply) => {
                reply.send(self.countdown.state()).ok();
            }
        }
    }

    /// Publish the local ready flag, then mirror it locally once accepted.
    async fn set_ready(&mut self, ready: bool) -> bool {
        let data = ready_data(ready);
        if let Err(e) = self
            .provider
            .update_player_data(&self.snapshot.id, &self.local_id, data)
            .await
        {
            warn!(lobby_id = %self.snapshot.id, ready, "Failed to publish ready flag: {e}");
            return false;
        }
        let local_id = self.local_id.clone();
        if self.record_ready(&local_id, ready).await && !ready {
            self.cancel_countdown().await;
        }
        self.check_launch().await;
        true
    }

    /// Membership changed: the local player has to confirm again.
    pub(crate) async fn reset_own_ready(&mut self) {
        let local_id = self.local_id.clone();
        self.record_ready(&local_id, false).await;
        self.cancel_countdown().await;
        if let Err(e) = self
            .provider
            .update_player_data(&self.snapshot.id, &self.local_id, ready_data(false))
            .await
        {
            warn!(lobby_id = %self.snapshot.id, "Failed to reset ready flag: {e}");
        }
    }

    /// HOST: establish the relay and publish its address. Other clients let
    /// the countdown finish without doing anything.
    pub(crate) async fn start_session(&mut self) {
        if !self.is_host() {
            debug!(lobby_id = %self.snapshot.id, "Countdown finished, waiting for host");
            return;
        }
        let published = self
            .handoff
            .publish(
                self.provider.as_ref(),
                self.relay.as_ref(),
                &self.snapshot,
                &self.local_id,
            )
            .await;
        match published {
            Some(address) => {
                self.snapshot
                    .data
                    .insert(KEY_START_GAME.to_string(), address.clone());
                self.snapshot.data.insert(
                    KEY_LOBBY_STATUS.to_string(),
                    LobbyStatus::InGame.as_str().to_string(),
                );
                self.snapshot.sync_status();
                self.notify(LobbyEvent::SessionStarted { address }).await;
            }
            None => {
                self.notify(LobbyEvent::Error("Failed to start session".to_string()))
                    .await;
            }
        }
    }

    /// Leave the lobby. A host marks it inactive on the way out.
    async fn leave(&mut self) -> bool {
        self.countdown.cancel();
        if self.is_host() {
            self.update_status(LobbyStatus::Inactive).await;
        }
        let left = match self.provider.leave().await {
            Ok(()) => {
                info!(lobby_id = %self.snapshot.id, "Left lobby");
                true
            }
            Err(e) => {
                warn!(lobby_id = %self.snapshot.id, "Failed to leave lobby: {e}");
                false
            }
        };
        self.finish();
        left
    }

    /// HOST: move a freshly created lobby into `ACTIVE`.
    pub(crate) async fn promote_to_active(&mut self) {
        self.update_status(LobbyStatus::Active).await;
    }

    /// HOST: write a new lobby status. Refuses non-owners and backward moves.
    async fn update_status(&mut self, status: LobbyStatus) -> bool {
        if !self.snapshot.is_owner(&self.local_id) {
            debug!(lobby_id = %self.snapshot.id, "Only the owner can change lobby status");
            return false;
        }
        if !self.snapshot.status.can_advance_to(status) {
            debug!(lobby_id = %self.snapshot.id, from = %self.snapshot.status, to = %status, "Ignoring backward status change");
            return false;
        }
        let data = HashMap::from([(KEY_LOBBY_STATUS.to_string(), status.as_str().to_string())]);
        match self
            .provider
            .update_lobby_data(&self.snapshot.id, data)
            .await
        {
            Ok(()) => {
                self.snapshot
                    .data
                    .insert(KEY_LOBBY_STATUS.to_string(), status.as_str().to_string());
                self.snapshot.sync_status();
                info!(lobby_id = %self.snapshot.id, %status, "Lobby status updated");
                true
            }
            Err(e) => {
                warn!(lobby_id = %self.snapshot.id, %status, "Failed to update lobby status: {e}");
                false
            }
        }
    }

    pub(crate) async fn heartbeat(&self) {
        if let Err(e) = self.provider.heartbeat(&self.snapshot.id).await {
            warn!(lobby_id = %self.snapshot.id, "Lobby heartbeat failed: {e}");
        }
    }
}

fn ready_data(ready: bool) -> DataMap {
    HashMap::from([(KEY_PLAYER_READY.to_string(), ready_value(ready))])
}
