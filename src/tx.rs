//! Local TX input
//!
//! The spacebar acts as a straight key: press is key-down, release is
//! key-up, with a short debounce against keyboard chatter. Edges fan out
//! to the decoder and the sidetone engine. Transmission back to the
//! server is not wired yet; the encoder is the interface seam for it.
//! TODO: encode accepted edges into DATA records once the server-side
//! keying format is confirmed.

use std::time::{Duration, Instant};

/// Debounce window for the spacebar
const DEBOUNCE: Duration = Duration::from_millis(2);

/// Converts accepted key transitions into `(is_on, timestamp)` events.
pub struct TxEncoder<F: FnMut(bool, Instant)> {
    on_event: F,
    key_on: bool,
}

impl<F: FnMut(bool, Instant)> TxEncoder<F> {
    pub fn new(on_event: F) -> Self {
        Self {
            on_event,
            key_on: false,
        }
    }

    pub fn key_down(&mut self, now: Instant) {
        if !self.key_on {
            self.key_on = true;
            (self.on_event)(true, now);
        }
    }

    pub fn key_up(&mut self, now: Instant) {
        if self.key_on {
            self.key_on = false;
            (self.on_event)(false, now);
        }
    }

    pub fn is_keyed(&self) -> bool {
        self.key_on
    }
}

/// Debounced straight-key front end for raw press/release events.
pub struct StraightKey {
    pressed: bool,
    last_edge: Option<Instant>,
}

impl StraightKey {
    pub fn new() -> Self {
        Self {
            pressed: false,
            last_edge: None,
        }
    }

    /// Raw press. Returns true when the edge is accepted.
    pub fn press(&mut self, now: Instant) -> bool {
        if self.pressed || !self.debounced(now) {
            return false;
        }
        self.pressed = true;
        self.last_edge = Some(now);
        true
    }

    /// Raw release. Returns true when the edge is accepted.
    pub fn release(&mut self, now: Instant) -> bool {
        if !self.pressed || !self.debounced(now) {
            return false;
        }
        self.pressed = false;
        self.last_edge = Some(now);
        true
    }

    fn debounced(&self, now: Instant) -> bool {
        self.last_edge
            .map_or(true, |last| now.duration_since(last) >= DEBOUNCE)
    }
}

impl Default for StraightKey {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn encoder_suppresses_repeats() {
        let events = RefCell::new(Vec::new());
        let mut enc = TxEncoder::new(|on, _| events.borrow_mut().push(on));
        let t = Instant::now();

        enc.key_down(t);
        enc.key_down(t + Duration::from_millis(5));
        enc.key_up(t + Duration::from_millis(60));
        enc.key_up(t + Duration::from_millis(65));

        assert_eq!(*events.borrow(), vec![true, false]);
    }

    #[test]
    fn straight_key_debounces_chatter() {
        let mut key = StraightKey::new();
        let t = Instant::now();

        assert!(key.press(t));
        // Release bouncing inside the debounce window is rejected
        assert!(!key.release(t + Duration::from_micros(500)));
        assert!(key.release(t + Duration::from_millis(40)));
        // Immediate re-press after the accepted release is rejected
        assert!(!key.press(t + Duration::from_millis(40)));
        assert!(key.press(t + Duration::from_millis(45)));
    }

    #[test]
    fn release_without_press_is_ignored() {
        let mut key = StraightKey::new();
        assert!(!key.release(Instant::now()));
    }
}
