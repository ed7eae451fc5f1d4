//! Network subsystem: per-wire UDP endpoints and the client workers

pub mod client;
pub mod socket;

pub use client::{ClientConfig, WireClient};
pub use socket::SocketManager;
