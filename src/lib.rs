pub mod backend;
mod closure;
mod config;
mod countdown;
mod error;
mod handoff;
mod lobby;
mod normalizer;
mod player;
mod provider;
mod readiness;
mod room;

pub use closure::{Closure, ClosureDetector};
pub use config::RoomSettings;
pub use countdown::{Countdown, CountdownDisplay, CountdownState, CountdownStep};
pub use error::LobbyError;
pub use handoff::RelayHandoff;
pub use lobby::*;
pub use normalizer::{CanonicalEvent, EventSink, Normalizer};
pub use player::{DataMap, KEY_PLAYER_READY, Player, PlayerId, parse_ready, ready_value};
pub use provider::*;
pub use readiness::{ReadinessTable, fetch_ready};
pub use room::{LobbyEvent, LobbyRoom};
