use thiserror::Error;

use crate::lobby::EnterResult;

#[derive(Error, Debug)]
pub enum LobbyError {
    #[error("Lobby could not be created: {0}")]
    HostFailed(#[source] anyhow::Error),
    #[error("Could not enter lobby: {0}")]
    Rejected(EnterResult),
    #[error("Lobby state could not be fetched: {0}")]
    Fetch(#[source] anyhow::Error),
    #[error("Lobby room is closed.")]
    RoomClosed,
}
