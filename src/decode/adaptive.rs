//! Adaptive Morse decoder
//!
//! Estimates the dot length of whoever is currently keying and converts
//! gate transitions into text. Two evidence paths feed the same dot
//! history: explicit millisecond hints from the timing player, and raw
//! key edges from the fallback gate or the local TX key. They converge on
//! the same estimate without sharing storage with the client's own.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::decode::alphabet;

/// Character emitted for codes with no table entry.
pub const UNKNOWN_GLYPH: char = '□';

const DIT_SEED_S: f32 = 0.060;
const DIT_MIN_S: f32 = 0.020;
const DIT_MAX_S: f32 = 0.150;
const DIT_HISTORY: usize = 24;

/// Gap thresholds in dot multiples
const INTRA_GAP: f32 = 1.5;
const CHAR_GAP: f32 = 3.5;
const WORD_GAP: f32 = 6.5;

/// Dash iff mark duration >= 2.4·dot
const DASH_THRESHOLD: f32 = 2.4;
/// Marks at most 2·dot long feed the dot history
const DIT_ADMIT: f32 = 2.0;

/// Glitch filter bounds in seconds
const MIN_SEG_S: f32 = 0.010;
const MAX_SEG_S: f32 = 1.200;

/// Consumer of decoded output.
pub trait DecodeSink: Send + Sync {
    /// An element was classified: `'.'` or `'-'`.
    fn on_symbol(&self, _symbol: char) {}

    /// A character or word space is ready.
    fn on_text(&self, _text: &str) {}
}

pub struct AdaptiveDecoder {
    sink: Arc<dyn DecodeSink>,

    symbols: String,
    dit: f32,
    dit_hist: VecDeque<f32>,

    down_at: Option<Instant>,
    up_at: Option<Instant>,
}

impl AdaptiveDecoder {
    pub fn new(sink: Arc<dyn DecodeSink>) -> Self {
        Self {
            sink,
            symbols: String::new(),
            dit: DIT_SEED_S,
            dit_hist: VecDeque::with_capacity(DIT_HISTORY),
            down_at: None,
            up_at: None,
        }
    }

    /// Current dot estimate in seconds.
    pub fn dot_seconds(&self) -> f32 {
        self.dit
    }

    /// PARIS-standard speed estimate.
    pub fn wpm(&self) -> f32 {
        1.2 / self.dit.max(1e-6)
    }

    /// Explicit mark duration from the authoritative timing path.
    ///
    /// Refines the dot estimate only; the element itself is classified from
    /// the gate edges the player emits in real time.
    pub fn hint_mark_ms(&mut self, ms: f32) {
        let dur = ms / 1000.0;
        if dur <= 0.0 || dur > MAX_SEG_S {
            return;
        }
        self.admit_dit_sample(dur);
    }

    /// Explicit space duration from the authoritative timing path.
    ///
    /// Consumed exactly as an elapsed gap. Disarms the pending up-edge so
    /// the same space is not measured a second time at the next key-down.
    pub fn hint_space_ms(&mut self, ms: f32) {
        let dur = ms / 1000.0;
        if dur <= 0.0 || dur > MAX_SEG_S {
            return;
        }
        self.consume_space(dur);
        self.up_at = None;
    }

    /// Key transition from the fallback gate or the local key.
    pub fn key_edge(&mut self, is_down: bool, t: Instant) {
        if is_down {
            if let Some(up) = self.up_at.take() {
                let off = (t - up).as_secs_f32().min(MAX_SEG_S);
                self.consume_space(off);
            }
            self.down_at = Some(t);
        } else {
            let Some(down) = self.down_at.take() else {
                return;
            };
            let on = (t - down).as_secs_f32().min(MAX_SEG_S);
            if on >= MIN_SEG_S {
                self.classify_mark(on);
            }
            self.up_at = Some(t);
        }
    }

    /// Periodic call to close characters and words during long silence.
    ///
    /// After a word-level flush the up-edge is disarmed, so an idle line
    /// emits exactly one trailing space.
    pub fn idle_tick(&mut self, now: Instant) {
        let Some(up) = self.up_at else {
            return;
        };
        let off = (now - up).as_secs_f32();
        if off >= WORD_GAP * self.dit {
            self.flush_char();
            self.sink.on_text(" ");
            self.up_at = None;
        } else if off >= CHAR_GAP * self.dit {
            self.flush_char();
        }
    }

    fn admit_dit_sample(&mut self, dur: f32) {
        if dur > DIT_ADMIT * self.dit {
            return;
        }
        if self.dit_hist.len() == DIT_HISTORY {
            self.dit_hist.pop_front();
        }
        self.dit_hist.push_back(dur);
        let mean: f32 = self.dit_hist.iter().sum::<f32>() / self.dit_hist.len() as f32;
        self.dit = mean.clamp(DIT_MIN_S, DIT_MAX_S);
    }

    fn classify_mark(&mut self, dur: f32) {
        self.admit_dit_sample(dur);
        let symbol = if dur < DASH_THRESHOLD * self.dit { '.' } else { '-' };
        self.symbols.push(symbol);
        self.sink.on_symbol(symbol);
    }

    fn consume_space(&mut self, off: f32) {
        if off < INTRA_GAP * self.dit {
            return;
        }
        self.flush_char();
        if off >= WORD_GAP * self.dit {
            self.sink.on_text(" ");
        }
    }

    fn flush_char(&mut self) {
        if self.symbols.is_empty() {
            return;
        }
        let ch = alphabet::lookup(&self.symbols).unwrap_or(UNKNOWN_GLYPH);
        self.symbols.clear();
        let mut buf = [0u8; 4];
        self.sink.on_text(ch.encode_utf8(&mut buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Capture {
        text: Mutex<String>,
        symbols: Mutex<String>,
    }

    impl DecodeSink for Capture {
        fn on_symbol(&self, symbol: char) {
            self.symbols.lock().unwrap().push(symbol);
        }
        fn on_text(&self, text: &str) {
            self.text.lock().unwrap().push_str(text);
        }
    }

    fn decoder() -> (AdaptiveDecoder, Arc<Capture>) {
        let cap = Arc::new(Capture::default());
        (AdaptiveDecoder::new(cap.clone()), cap)
    }

    /// Drive the decoder with alternating mark/space durations in ms,
    /// starting key-down at `t0`.
    fn play_edges(dec: &mut AdaptiveDecoder, t0: Instant, durs_ms: &[i64]) -> Instant {
        let mut t = t0;
        let mut down = true;
        dec.key_edge(true, t);
        for &d in durs_ms {
            t += Duration::from_millis(d.unsigned_abs());
            down = !down;
            dec.key_edge(down, t);
        }
        t
    }

    #[test]
    fn single_dot_becomes_e() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        // [60, -400]: one mark then silence past the word gap
        let t = play_edges(&mut dec, t0, &[60]);
        dec.idle_tick(t + Duration::from_millis(400));
        let text = cap.text.lock().unwrap().clone();
        assert!(text.starts_with('E'), "got {text:?}");
        assert_eq!(cap.symbols.lock().unwrap().as_str(), ".");
    }

    #[test]
    fn a_then_n_with_word_gap() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        // .-  gap  -.  then silence
        let t = play_edges(&mut dec, t0, &[60, -60, 180, -240, 180, -60, 60]);
        dec.idle_tick(t + Duration::from_millis(500));
        assert_eq!(cap.text.lock().unwrap().as_str(), "AN ");
        assert_eq!(cap.symbols.lock().unwrap().as_str(), ".--.");
    }

    #[test]
    fn unknown_code_emits_glyph() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        // .-.-.-. : seven alternating elements, no ITU mapping
        let t = play_edges(
            &mut dec,
            t0,
            &[60, -60, 180, -60, 60, -60, 180, -60, 60, -60, 180, -60, 60],
        );
        dec.idle_tick(t + Duration::from_millis(600));
        let text = cap.text.lock().unwrap().clone();
        assert!(text.contains(UNKNOWN_GLYPH), "got {text:?}");
    }

    #[test]
    fn dash_threshold_straddles_2_4_dots() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        // dit stays at the 60 ms seed while marks stay <= 2 dots
        dec.key_edge(true, t0);
        dec.key_edge(false, t0 + Duration::from_millis(143));
        dec.key_edge(true, t0 + Duration::from_millis(400));
        dec.key_edge(false, t0 + Duration::from_millis(400 + 150));
        let symbols = cap.symbols.lock().unwrap().clone();
        assert_eq!(symbols, ".-");
    }

    #[test]
    fn space_between_char_and_word_gap_flushes_only() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        // dot, then a 4-dot gap (char flush, no word space), then dot
        let t = play_edges(&mut dec, t0, &[60, -240, 60]);
        dec.idle_tick(t + Duration::from_millis(250));
        let text = cap.text.lock().unwrap().clone();
        assert!(text.starts_with("EE"), "got {text:?}");
        assert!(!text.trim_end().contains(' '));
    }

    #[test]
    fn word_gap_emits_trailing_space_once() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        let t = play_edges(&mut dec, t0, &[60]);
        // Repeated ticks deep into the word gap flush exactly once
        dec.idle_tick(t + Duration::from_millis(500));
        dec.idle_tick(t + Duration::from_millis(600));
        dec.idle_tick(t + Duration::from_millis(700));
        assert_eq!(cap.text.lock().unwrap().as_str(), "E ");
    }

    #[test]
    fn explicit_hints_match_edge_behaviour() {
        let (mut dec, cap) = decoder();
        // Mark hints refine the estimate; space hints close characters
        dec.hint_mark_ms(60.0);
        let t0 = Instant::now();
        play_edges(&mut dec, t0, &[60, -60, 180]);
        dec.hint_space_ms(300.0);
        assert_eq!(cap.text.lock().unwrap().as_str(), "A");
        // The consumed hint disarmed the edge path: a following key-down
        // does not double-flush
        dec.key_edge(true, t0 + Duration::from_millis(700));
        assert_eq!(cap.text.lock().unwrap().as_str(), "A");
    }

    #[test]
    fn word_gap_hint_emits_space() {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        play_edges(&mut dec, t0, &[60]);
        dec.hint_space_ms(420.0);
        assert_eq!(cap.text.lock().unwrap().as_str(), "E ");
    }

    #[test]
    fn dot_estimate_stays_bounded() {
        let (mut dec, _cap) = decoder();
        for _ in 0..50 {
            dec.hint_mark_ms(1.0);
        }
        assert!(dec.dot_seconds() >= DIT_MIN_S);
        for _ in 0..50 {
            dec.hint_mark_ms(990.0);
        }
        assert!(dec.dot_seconds() <= DIT_MAX_S);
    }

    #[test]
    fn glitches_are_ignored()  {
        let (mut dec, cap) = decoder();
        let t0 = Instant::now();
        dec.key_edge(true, t0);
        dec.key_edge(false, t0 + Duration::from_millis(3));
        assert!(cap.symbols.lock().unwrap().is_empty());
    }

    #[test]
    fn wpm_follows_dot() {
        let (mut dec, _cap) = decoder();
        for _ in 0..24 {
            dec.hint_mark_ms(60.0);
        }
        let wpm = dec.wpm();
        assert!((wpm - 20.0).abs() < 1.0, "got {wpm}");
    }
}
