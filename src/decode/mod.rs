//! Morse decoding: adaptive timing decoder and sender classification

pub mod adaptive;
pub mod alphabet;
pub mod classifier;

pub use adaptive::{AdaptiveDecoder, DecodeSink};
pub use classifier::{SenderClassifier, SenderMode};
