//! Fallback keying gate
//!
//! When a DATA record yields no extractable timings, the server is
//! streaming key-down as a burst of packets separated by short gaps. This
//! state machine turns packet arrivals into gate edges with an adaptive
//! off-timeout, so a single element is not shattered into false dots.
//!
//! The machine is pure: callers inject timestamps, which keeps it testable
//! without sockets. The surrounding RX worker performs the active polling
//! window that extends while fresh bytes arrive.

use std::time::{Duration, Instant};

/// Edge produced by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// OFF → ON transition
    On,
    /// ON → OFF transition, with the element classified from the ON span
    Off { symbol: char },
}

pub struct FallbackGate {
    on: bool,
    started: Option<Instant>,
    last_activity: Option<Instant>,
}

impl FallbackGate {
    pub fn new() -> Self {
        Self {
            on: false,
            started: None,
            last_activity: None,
        }
    }

    /// Off-timeout proportional to the current dot estimate.
    pub fn off_threshold(dot_est: f32) -> Duration {
        Duration::from_secs_f32((1.1 * dot_est).clamp(0.040, 0.250))
    }

    /// A packet arrived. Returns `Some(GateEvent::On)` on the rising edge.
    pub fn on_packet(&mut self, now: Instant) -> Option<GateEvent> {
        self.last_activity = Some(now);
        if self.on {
            return None;
        }
        self.on = true;
        self.started = Some(now);
        Some(GateEvent::On)
    }

    /// Fresh bytes arrived mid-element; extend the activity window.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Close the gate if the activity window has expired.
    pub fn check_off(&mut self, now: Instant, dot_est: f32) -> Option<GateEvent> {
        if !self.on {
            return None;
        }
        let last = self.last_activity?;
        if now.duration_since(last) < Self::off_threshold(dot_est) {
            return None;
        }
        self.on = false;
        let dur = self
            .started
            .map(|s| last.duration_since(s).as_secs_f32())
            .unwrap_or(0.0);
        let symbol = if dur < 2.5 * dot_est { '.' } else { '-' };
        self.started = None;
        Some(GateEvent::Off { symbol })
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Forget everything, e.g. after a tune change.
    pub fn reset(&mut self) {
        self.on = false;
        self.started = None;
        self.last_activity = None;
    }
}

impl Default for FallbackGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOT: f32 = 0.060;

    #[test]
    fn burst_produces_one_on_one_off() {
        let mut gate = FallbackGate::new();
        let t0 = Instant::now();

        // Six packets at 10 ms spacing
        let mut events = Vec::new();
        for i in 0..6 {
            let t = t0 + Duration::from_millis(10 * i);
            if let Some(ev) = gate.on_packet(t) {
                events.push(ev);
            }
            // No off-edge fires while packets keep coming
            assert_eq!(gate.check_off(t, DOT), None);
        }
        assert_eq!(events, vec![GateEvent::On]);

        // 300 ms of silence closes the gate exactly once
        let quiet = t0 + Duration::from_millis(300);
        let off = gate.check_off(quiet, DOT).unwrap();
        // ON span was 50 ms: well under 2.5 dots, so a dot
        assert_eq!(off, GateEvent::Off { symbol: '.' });
        assert_eq!(gate.check_off(quiet + Duration::from_millis(10), DOT), None);
    }

    #[test]
    fn long_burst_classifies_dash() {
        let mut gate = FallbackGate::new();
        let t0 = Instant::now();
        gate.on_packet(t0);
        gate.touch(t0 + Duration::from_millis(200));
        let off = gate
            .check_off(t0 + Duration::from_millis(500), DOT)
            .unwrap();
        assert_eq!(off, GateEvent::Off { symbol: '-' });
    }

    #[test]
    fn threshold_scales_with_dot_and_clamps() {
        let near = |d: Duration, s: f32| (d.as_secs_f32() - s).abs() < 1e-4;
        assert!(near(FallbackGate::off_threshold(0.060), 0.066));
        assert!(near(FallbackGate::off_threshold(0.010), 0.040));
        assert!(near(FallbackGate::off_threshold(0.500), 0.250));
    }

    #[test]
    fn activity_extension_defers_off() {
        let mut gate = FallbackGate::new();
        let t0 = Instant::now();
        gate.on_packet(t0);
        // 50 ms later the window would expire at ~66 ms, but a touch resets it
        gate.touch(t0 + Duration::from_millis(50));
        assert_eq!(gate.check_off(t0 + Duration::from_millis(80), DOT), None);
        assert!(gate
            .check_off(t0 + Duration::from_millis(150), DOT)
            .is_some());
    }

    #[test]
    fn reset_clears_state() {
        let mut gate = FallbackGate::new();
        let t0 = Instant::now();
        gate.on_packet(t0);
        gate.reset();
        assert!(!gate.is_on());
        assert_eq!(gate.check_off(t0 + Duration::from_secs(1), DOT), None);
    }
}
