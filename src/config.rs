use std::{env, str::FromStr, time::Duration};

/// Tunables for a lobby room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    /// Number of countdown ticks between all-ready and launch.
    pub countdown_ticks: u32,
    pub tick_period: Duration,
    /// How often a host keeps its lobby alive.
    pub heartbeat_interval: Duration,
    /// Capacity of the channel carrying handle requests to the room.
    pub command_buffer: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            tick_period: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(6),
            command_buffer: 32,
        }
    }
}

impl RoomSettings {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_vars()
    }

    fn from_vars() -> Self {
        let defaults = Self::default();
        Self {
            countdown_ticks: read("LOBBY_COUNTDOWN_TICKS").unwrap_or(defaults.countdown_ticks),
            tick_period: read("LOBBY_COUNTDOWN_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_period),
            heartbeat_interval: read("LOBBY_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            command_buffer: read("LOBBY_COMMAND_BUFFER").unwrap_or(defaults.command_buffer),
        }
    }
}

fn read<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
