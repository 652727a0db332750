//! Host-loss detection and session closure

use crate::player::PlayerId;

/// What the local client must do when the session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// The lobby is gone; the local client still has to leave it.
    LeaveAndNotify,
    /// The local client is the original owner and already left.
    Notify,
}

/// Watches departures for the original owner.
///
/// The owner id is captured once, when the lobby is hosted or joined, and is
/// never refreshed: backends may hand ownership to another member as soon as
/// the owner leaves.
#[derive(Debug, Clone)]
pub struct ClosureDetector {
    owner_id: PlayerId,
    local_id: PlayerId,
    closed: bool,
}

impl ClosureDetector {
    pub fn new(owner_id: PlayerId, local_id: PlayerId) -> Self {
        Self {
            owner_id,
            local_id,
            closed: false,
        }
    }

    pub fn owner_id(&self) -> &PlayerId {
        &self.owner_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A player left. Closes the session if it was the captured owner.
    pub fn player_left(&mut self, player_id: &PlayerId) -> Option<Closure> {
        if player_id != &self.owner_id {
            return None;
        }
        self.close()
    }

    /// The backend reported the lobby gone.
    pub fn lobby_closed(&mut self) -> Option<Closure> {
        self.close()
    }

    fn close(&mut self) -> Option<Closure> {
        if self.closed {
            return None;
        }
        self.closed = true;
        if self.local_id == self.owner_id {
            Some(Closure::Notify)
        } else {
            Some(Closure::LeaveAndNotify)
        }
    }
}
