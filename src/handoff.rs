//! Relay address handoff from host to joiners

use std::collections::HashMap;
use tracing::{info, warn};

use crate::lobby::{KEY_LOBBY_STATUS, KEY_START_GAME, LobbySnapshot, LobbyStatus};
use crate::player::PlayerId;
use crate::provider::{LobbyProvider, RelayService};

/// Tracks the one relay session a lobby may launch.
#[derive(Debug, Default)]
pub struct RelayHandoff {
    /// Relay established by this host, kept so a failed publish is retried
    /// with the same address instead of a second relay.
    hosted: Option<String>,
    published: bool,
    consumed: bool,
}

impl RelayHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Host path: create the relay and write its address together with the
    /// `INGAME` status. Returns the address once it is published.
    ///
    /// Either both lobby fields change or neither does.
    pub async fn publish<P, R>(
        &mut self,
        provider: &P,
        relay: &R,
        snapshot: &LobbySnapshot,
        local_id: &PlayerId,
    ) -> Option<String>
    where
        P: LobbyProvider + ?Sized,
        R: RelayService + ?Sized,
    {
        if !snapshot.is_owner(local_id) {
            return None;
        }
        if self.published {
            return None;
        }
        if snapshot.status != LobbyStatus::Active {
            warn!(
                lobby_id = %snapshot.id,
                status = %snapshot.status,
                "Only an ACTIVE lobby can launch"
            );
            return None;
        }

        let address = match &self.hosted {
            Some(address) => address.clone(),
            None => match relay.host_relay().await {
                Ok(address) => {
                    self.hosted = Some(address.clone());
                    address
                }
                Err(e) => {
                    warn!(lobby_id = %snapshot.id, "Failed to establish relay: {e}");
                    return None;
                }
            },
        };

        let data = HashMap::from([
            (KEY_START_GAME.to_string(), address.clone()),
            (
                KEY_LOBBY_STATUS.to_string(),
                LobbyStatus::InGame.as_str().to_string(),
            ),
        ]);
        match provider.update_lobby_data(&snapshot.id, data).await {
            Ok(()) => {
                self.published = true;
                info!(lobby_id = %snapshot.id, %address, "Session published");
                Some(address)
            }
            Err(e) => {
                warn!(lobby_id = %snapshot.id, "Failed to publish session address: {e}");
                None
            }
        }
    }

    /// Joiner path: claim the published address the first time it shows up.
    ///
    /// The guard is set here, before any join is attempted.
    pub fn consume(&mut self, snapshot: &LobbySnapshot, local_id: &PlayerId) -> Option<String> {
        if self.consumed || snapshot.is_owner(local_id) {
            return None;
        }
        let address = snapshot.launch_address()?.to_string();
        self.consumed = true;
        Some(address)
    }
}
