//! Sender classification from keying statistics
//!
//! A machine feed keys with near-constant element lengths; a human never
//! does. The coefficient of variation over a sliding window of recent
//! mark and space durations separates the two, and the shortest recent
//! mark doubles as a speed estimate.

use std::collections::VecDeque;

const WINDOW: usize = 64;
const MIN_SAMPLES: usize = 12;
const AUTO_CV_MARKS: f32 = 0.12;
const AUTO_CV_SPACES: f32 = 0.18;

/// Classified keying source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderMode {
    /// Not enough evidence yet
    Unknown,
    /// Machine-regular timing
    Auto,
    /// Human-irregular timing
    Human,
}

impl SenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderMode::Unknown => "—",
            SenderMode::Auto => "AUTO",
            SenderMode::Human => "HUMAN",
        }
    }
}

/// Sample standard deviation over mean. Degenerate windows report 1.0 so
/// they never classify as machine-regular.
fn coefficient_of_variation(vals: &VecDeque<f32>) -> f32 {
    let n = vals.len();
    if n < 2 {
        return 1.0;
    }
    let mean: f32 = vals.iter().sum::<f32>() / n as f32;
    if mean <= 1e-9 {
        return 1.0;
    }
    let var: f32 = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / (n - 1) as f32;
    var.max(0.0).sqrt() / mean
}

pub struct SenderClassifier {
    marks: VecDeque<f32>,
    spaces: VecDeque<f32>,
    mode: SenderMode,
    wpm: f32,
}

impl SenderClassifier {
    pub fn new() -> Self {
        Self {
            marks: VecDeque::with_capacity(WINDOW),
            spaces: VecDeque::with_capacity(WINDOW),
            mode: SenderMode::Unknown,
            wpm: 0.0,
        }
    }

    pub fn update_mark_ms(&mut self, ms: f32) {
        if ms > 0.5 && ms < 10_000.0 {
            if self.marks.len() == WINDOW {
                self.marks.pop_front();
            }
            self.marks.push_back(ms);
        }
        self.reclassify();
    }

    pub fn update_space_ms(&mut self, ms: f32) {
        if ms > 0.5 && ms < 10_000.0 {
            if self.spaces.len() == WINDOW {
                self.spaces.pop_front();
            }
            self.spaces.push_back(ms);
        }
        self.reclassify();
    }

    /// Current label and WPM estimate.
    pub fn get(&self) -> (SenderMode, f32) {
        (self.mode, self.wpm)
    }

    fn reclassify(&mut self) {
        if let Some(min_mark) = self.marks.iter().copied().reduce(f32::min) {
            let dot_s = min_mark / 1000.0;
            if dot_s > 1e-3 {
                self.wpm = 1.2 / dot_s;
            }
        }
        if self.marks.len() >= MIN_SAMPLES && self.spaces.len() >= MIN_SAMPLES {
            let cm = coefficient_of_variation(&self.marks);
            let cs = coefficient_of_variation(&self.spaces);
            self.mode = if cm < AUTO_CV_MARKS && cs < AUTO_CV_SPACES {
                SenderMode::Auto
            } else {
                SenderMode::Human
            };
        }
    }
}

impl Default for SenderClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown() {
        let c = SenderClassifier::new();
        assert_eq!(c.get().0, SenderMode::Unknown);
    }

    #[test]
    fn regular_feed_classifies_auto() {
        let mut c = SenderClassifier::new();
        for _ in 0..16 {
            c.update_mark_ms(60.0);
            c.update_space_ms(60.0);
        }
        let (mode, wpm) = c.get();
        assert_eq!(mode, SenderMode::Auto);
        assert!((wpm - 20.0).abs() < 0.5, "got {wpm}");
    }

    #[test]
    fn jittered_keying_classifies_human() {
        let mut c = SenderClassifier::new();
        // Deterministic jitter around 60 ms, well above the CV thresholds
        let jitter = [38.0, 95.0, 52.0, 120.0, 44.0, 80.0, 33.0, 110.0];
        for i in 0..24 {
            let j = jitter[i % jitter.len()];
            c.update_mark_ms(j);
            c.update_space_ms(jitter[(i + 3) % jitter.len()]);
        }
        assert_eq!(c.get().0, SenderMode::Human);
    }

    #[test]
    fn implausible_durations_are_dropped() {
        let mut c = SenderClassifier::new();
        c.update_mark_ms(0.2);
        c.update_mark_ms(20_000.0);
        assert_eq!(c.get().1, 0.0);
    }

    #[test]
    fn wpm_tracks_minimum_mark() {
        let mut c = SenderClassifier::new();
        c.update_mark_ms(120.0);
        c.update_mark_ms(40.0);
        c.update_mark_ms(90.0);
        let (_, wpm) = c.get();
        assert!((wpm - 30.0).abs() < 0.5, "got {wpm}");
    }
}
