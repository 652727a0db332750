//! Lobby backends bundled with the crate.

pub mod memory;
