//! Membership and readiness bookkeeping

use std::{collections::HashMap, fmt::Display, ops::Deref};
use tracing::{debug, warn};

use crate::lobby::LobbySnapshot;
use crate::player::{KEY_PLAYER_READY, PlayerId, parse_ready};
use crate::provider::LobbyProvider;

/// Ready flag per joined player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessTable(HashMap<PlayerId, bool>);

impl Deref for ReadinessTable {
    type Target = HashMap<PlayerId, bool>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ReadinessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.0.keys().collect();
        ids.sort();
        for id in ids {
            let mut short = id.to_string();
            short.truncate(10);
            let ready = if self.0[id] { "ready" } else { "not ready" };
            writeln!(f, "[{short}]: {ready}")?;
        }
        Ok(())
    }
}

impl ReadinessTable {
    /// Seed with every player in `snapshot`, all not ready.
    pub fn from_snapshot(snapshot: &LobbySnapshot) -> Self {
        Self(
            snapshot
                .players
                .iter()
                .map(|player| (player.id.clone(), false))
                .collect(),
        )
    }

    /// Track a newly joined player as not ready.
    pub fn insert_joined(&mut self, player_id: &PlayerId) {
        self.0.insert(player_id.clone(), false);
    }

    pub fn remove(&mut self, player_id: &PlayerId) -> Option<bool> {
        self.0.remove(player_id)
    }

    /// Overwrite the flag of a tracked player. Returns whether the stored
    /// value changed; players no longer tracked are left alone.
    pub fn set(&mut self, player_id: &PlayerId, ready: bool) -> bool {
        match self.0.get_mut(player_id) {
            Some(current) if *current != ready => {
                *current = ready;
                true
            }
            Some(_) => false,
            None => {
                debug!(%player_id, "Ready flag for an untracked player, ignoring");
                false
            }
        }
    }

    pub fn is_ready(&self, player_id: &PlayerId) -> bool {
        self.0.get(player_id).copied().unwrap_or(false)
    }

    /// True only when at least one player is tracked and all of them are ready.
    pub fn should_launch(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|ready| *ready)
    }
}

/// Read a player's ready flag from the backend. Any failure reads as not ready.
pub async fn fetch_ready<P: LobbyProvider + ?Sized>(provider: &P, player_id: &PlayerId) -> bool {
    match provider.get_player_data(player_id, KEY_PLAYER_READY).await {
        Ok(Some(value)) => parse_ready(&value),
        Ok(None) => false,
        Err(e) => {
            warn!(%player_id, "Failed to read ready flag, treating as not ready: {e}");
            false
        }
    }
}
