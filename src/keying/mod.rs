//! Keying reconstruction: the authoritative timing player and the
//! per-arrival fallback gate

pub mod gate;
pub mod player;

pub use gate::{FallbackGate, GateEvent};
pub use player::{PlayerSink, TimingPlayer};
