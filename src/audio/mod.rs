//! Sidetone audio subsystem

pub mod engine;

pub use engine::{SidetoneControl, SidetoneEngine};
