//! Notification surfaces
//!
//! The client and the station never hold references into the host
//! application; everything flows outward through these traits. Both are
//! invoked from worker threads, so implementations must be `Send + Sync`
//! and marshal to their own UI thread if they have one.

/// Notifications from the network/timing layer ([`crate::WireClient`]).
///
/// Every method has a no-op default so hosts implement only what they
/// consume.
pub trait WireEvents: Send + Sync {
    /// Envelope sample for a wire in the window, ~60 Hz.
    fn on_env(&self, _wire: u32, _env: f32) {}

    /// Neighbour keying latch changed.
    fn on_key(&self, _wire: u32, _is_on: bool) {}

    /// S-meter level for the primary wire, ~60 Hz.
    fn on_center_level(&self, _level: f32, _over: f32) {}

    /// Gate edge on the primary wire.
    fn on_center_keying(&self, _is_on: bool) {}

    /// Element classified at mark end: `'.'` or `'-'`.
    fn on_center_element(&self, _symbol: char) {}

    /// Explicit mark duration recovered from packet timings.
    fn on_center_mark_ms(&self, _ms: f32) {}

    /// Explicit space duration recovered from packet timings.
    fn on_center_space_ms(&self, _ms: f32) {}
}

/// One-way surface toward the front panel.
pub trait PanelSink: Send + Sync {
    /// Append decoded symbols and text to the reader view.
    fn append_text(&self, _text: &str) {}

    /// Window / badge title.
    fn set_title(&self, _title: &str) {}

    /// Smoothed S-meter value in [0, 1] plus an over-scale component.
    fn set_smeter(&self, _s_units: f32, _over_db: f32) {}

    /// One waterfall intensity line, values in [0, 1].
    fn set_waterfall_line(&self, _line: &[f32]) {}

    /// The currently tuned primary wire.
    fn set_channel_display(&self, _center: u32) {}

    /// Marker position as a fraction of the waterfall width.
    fn set_marker_fraction(&self, _fraction: f32) {}
}

/// Sink that discards every notification. Useful as a default and in tests.
pub struct NullPanel;

impl PanelSink for NullPanel {}

impl WireEvents for NullPanel {}
