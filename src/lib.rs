//! # CW Wire Client
//!
//! Client library for a CW (continuous-wave Morse) relay service that
//! multiplexes telegraph "wires" over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           RELAY SERVER (UDP :7890)                    │
//! └───────┬───────────────────────┬──────────────────────────────────────┘
//!         │ primary wire          │ neighbour wires (2·span sockets)
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ Primary RX    │       │ Side-scan     │──► envelopes / key latches
//! │ worker        │       │ worker        │        │
//! └───┬───────┬───┘       └───────────────┘        ▼
//!     │       │ no timings                  ┌───────────────┐
//!     │       └────────────►┌────────────┐  │ ActivityProbe │──► waterfall
//!     │ timing sequences    │ Fallback   │  └───────────────┘      line
//!     ▼                     │ gate       │
//! ┌───────────────┐         └─────┬──────┘
//! │ TimingPlayer  │───────────────┤ gate edges, elements, level
//! │ worker        │               ▼
//! └───────────────┘       ┌───────────────┐    ┌───────────────┐
//!                         │ AdaptiveMorse │──► │ PanelSink     │
//!    spacebar ──► TX ───► │ decoder +     │    │ (text, meter, │
//!                 encoder │ classifier    │    │  waterfall)   │
//!                    │    └───────────────┘    └───────────────┘
//!                    ▼
//!            ┌───────────────┐
//!            │ SidetoneEngine│──► audio out (cpal callback)
//!            └───────────────┘
//! ```
//!
//! The [`Station`] type assembles the full receive pipeline; [`WireClient`]
//! alone provides the network/timing layer behind the [`WireEvents`] trait
//! for hosts that bring their own decoder or audio.

pub mod audio;
pub mod decode;
pub mod error;
pub mod events;
pub mod keying;
pub mod network;
pub mod probe;
pub mod protocol;
pub mod station;
pub mod tx;

pub use error::{Error, Result};
pub use events::{PanelSink, WireEvents};
pub use network::client::{ClientConfig, WireClient};
pub use station::{Station, StationConfig};

/// Application-wide constants
pub mod constants {
    /// UDP port of the relay server
    pub const RELAY_PORT: u16 = 7890;

    /// Default half-width of the subscribed wire window
    pub const DEFAULT_SPAN: u32 = 5;

    /// Sample rate of the sidetone output stream
    pub const SIDETONE_SAMPLE_RATE: u32 = 48_000;

    /// Sidetone blocksize in frames
    pub const SIDETONE_BLOCK: u32 = 256;

    /// Default sidetone frequency in Hz
    pub const DEFAULT_TONE_HZ: f32 = 600.0;

    /// Heartbeat interval per subscribed socket (server tolerance is ~60 s)
    pub const HEARTBEAT_SECS: u64 = 25;

    /// Requested receive buffer per wire socket
    pub const RECV_BUFFER_BYTES: usize = 262_144;

    /// Largest datagram the client will accept
    pub const MAX_DATAGRAM: usize = 1024;
}
