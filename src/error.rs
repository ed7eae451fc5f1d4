//! Error types for the wire client

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network subsystem errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Cannot resolve relay host: {0}")]
    ResolveFailed(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No output device available")]
    NoDevice,

    #[error("Failed to open stream: {0}")]
    StreamError(String),
}

/// Client construction and lifecycle errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid wire number: {0} (wires are positive)")]
    InvalidWire(u32),

    #[error("Client already running")]
    AlreadyRunning,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
