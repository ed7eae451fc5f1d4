//! Neighbour activity probe
//!
//! Synthesises one waterfall intensity line per UI frame. Neighbour
//! columns light up only when their wire is genuinely active: a latched
//! key-on paints a bright pulse, an envelope above threshold drives a
//! small dot/dash run generator, and dead channels stay at the baseline.
//! The centre column follows the primary gate through a smoothed value so
//! elements appear as solid strokes rather than flicker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Column floor for subscribed-but-quiet wires
const BASELINE: f32 = 0.035;
/// Envelope below this is treated as silence
const DEFAULT_ENV_THRESHOLD: f32 = 0.03;
/// Hold time after an explicit key-on
const KEY_HOLD: Duration = Duration::from_millis(220);
/// Probability per frame that the run generator starts an ON phase
const RUN_START_PROB: f32 = 0.42;

/// Centre gate smoothing
const GATE_ATTACK: f32 = 0.62;
const GATE_RELEASE: f32 = 0.18;

/// Deterministic LCG, the classic rand() recurrence. Seeded so two probes
/// render identical scenic activity for identical inputs.
struct Lcg {
    state: u32,
}

impl Lcg {
    fn new(seed: u32) -> Self {
        Self {
            state: seed.wrapping_add(1),
        }
    }

    fn next_f32(&mut self) -> f32 {
        self.state = self.state.wrapping_mul(1_103_515_245).wrapping_add(12345);
        (self.state >> 16) as f32 / 65536.0
    }

    /// Uniform integer in `lo..=hi`.
    fn next_range(&mut self, lo: i32, hi: i32) -> i32 {
        self.state = self.state.wrapping_mul(1_103_515_245).wrapping_add(12345);
        lo + ((self.state >> 16) % (hi - lo + 1) as u32) as i32
    }
}

#[derive(Default)]
struct WireVisual {
    env: f32,
    key_on: bool,
    hold_until: Option<Instant>,
    /// true = run generator is in its ON phase
    run_on: bool,
    run_left: i32,
}

pub struct ActivityProbe {
    center: u32,
    env_threshold: f32,
    wires: HashMap<u32, WireVisual>,
    columns: HashMap<u32, usize>,
    rng: Lcg,
    gate: f32,
    gate_target: f32,
}

impl ActivityProbe {
    pub fn new(center: u32) -> Self {
        Self::with_seed(center, 12345)
    }

    pub fn with_seed(center: u32, seed: u32) -> Self {
        Self {
            center,
            env_threshold: DEFAULT_ENV_THRESHOLD,
            wires: HashMap::new(),
            columns: HashMap::new(),
            rng: Lcg::new(seed),
            gate: 0.0,
            gate_target: 0.0,
        }
    }

    pub fn set_center(&mut self, wire: u32) {
        self.center = wire;
    }

    /// Assign each wire its x pixel on the output line.
    pub fn set_columns(&mut self, wire_to_x: HashMap<u32, usize>) {
        self.columns = wire_to_x;
    }

    /// Latest envelope sample for a wire.
    pub fn update_env(&mut self, wire: u32, env: f32) {
        self.wires.entry(wire).or_default().env = env;
    }

    /// Explicit keying latch change. Key-on arms a short hold so real
    /// pulses stay visible for at least one frame.
    pub fn set_key(&mut self, wire: u32, is_on: bool, now: Instant) {
        let visual = self.wires.entry(wire).or_default();
        visual.key_on = is_on;
        if is_on {
            let until = now + KEY_HOLD;
            visual.hold_until = Some(match visual.hold_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
        }
    }

    /// Target for the centre column, 1.0 while the primary gate is on.
    pub fn set_gate_target(&mut self, on: bool) {
        self.gate_target = if on { 1.0 } else { 0.0 };
    }

    /// Produce the next intensity line.
    pub fn next_line(&mut self, width: usize, now: Instant) -> Vec<f32> {
        let mut line = vec![BASELINE; width];
        if width == 0 {
            return line;
        }

        let columns: Vec<(u32, usize)> = self
            .columns
            .iter()
            .map(|(&w, &x)| (w, x))
            .collect();
        for (wire, x) in columns {
            if wire == self.center {
                continue;
            }
            let threshold = self.env_threshold;
            let Some(visual) = self.wires.get_mut(&wire) else {
                continue;
            };

            let held = visual.hold_until.is_some_and(|until| now < until);
            if visual.key_on || held {
                let half = self.rng.next_range(1, 2);
                draw_pulse(&mut line, x, half as usize, 0.90);
                continue;
            }
            if visual.env < threshold {
                continue;
            }

            // Scenic run generator: plausible dot/dash trains, stepped
            // down one frame at a time
            if visual.run_left <= 0 {
                if visual.run_on {
                    visual.run_on = false;
                    visual.run_left = self.rng.next_range(1, 3);
                } else if self.rng.next_f32() < RUN_START_PROB {
                    visual.run_on = true;
                    let is_dot = self.rng.next_f32() < 0.65;
                    visual.run_left = if is_dot {
                        self.rng.next_range(1, 2)
                    } else {
                        self.rng.next_range(3, 5)
                    };
                } else {
                    visual.run_left = self.rng.next_range(1, 3);
                }
            }
            visual.run_left -= 1;

            if visual.run_on {
                let v = 0.22 + 0.65 * visual.env.max(0.05);
                let half = self.rng.next_range(1, 2);
                draw_pulse(&mut line, x, half as usize, v);
            }
        }

        // Centre column rides the smoothed gate
        let k = if self.gate_target > self.gate {
            GATE_ATTACK
        } else {
            GATE_RELEASE
        };
        self.gate = (self.gate + (self.gate_target - self.gate) * k).clamp(0.0, 1.0);
        if self.gate > 0.05 {
            let x = self
                .columns
                .get(&self.center)
                .copied()
                .unwrap_or(width / 2);
            draw_pulse(&mut line, x, 3, 0.18 + 0.82 * self.gate);
        }

        line
    }
}

/// Triangular pulse of the given half-width, peaking at `x`. Clipped
/// pulses at the line edges fall back to a flat top.
fn draw_pulse(line: &mut [f32], x: usize, half: usize, v: f32) {
    let v = v.clamp(0.0, 1.0);
    let width = line.len();
    let x1 = x.saturating_sub(half);
    let x2 = (x + half + 1).min(width);
    if x2 <= x1 {
        return;
    }

    let full = 2 * half + 1;
    if x2 - x1 == full {
        for (i, cell) in line[x1..x2].iter_mut().enumerate() {
            let d = (i as i32 - half as i32).unsigned_abs() as usize;
            let ramp = 0.6 + 0.4 * (half - d) as f32 / half.max(1) as f32;
            *cell = cell.max(v * ramp);
        }
    } else {
        for cell in line[x1..x2].iter_mut() {
            *cell = cell.max(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_with_columns() -> ActivityProbe {
        let mut probe = ActivityProbe::with_seed(133, 7);
        let mut cols = HashMap::new();
        cols.insert(132, 20);
        cols.insert(133, 50);
        cols.insert(134, 80);
        probe.set_columns(cols);
        probe
    }

    #[test]
    fn quiet_channels_hold_baseline() {
        let mut probe = probe_with_columns();
        let line = probe.next_line(100, Instant::now());
        assert!(line.iter().all(|&v| (v - BASELINE).abs() < 1e-6));
    }

    #[test]
    fn latched_key_paints_bright_pulse() {
        let mut probe = probe_with_columns();
        let now = Instant::now();
        probe.set_key(132, true, now);
        let line = probe.next_line(100, now);
        assert!((line[20] - 0.90).abs() < 1e-6, "got {}", line[20]);
        // Neighbouring pixels ramp down but stay above baseline
        assert!(line[19] > BASELINE);
        assert!(line[21] > BASELINE);
    }

    #[test]
    fn key_hold_outlives_release_briefly() {
        let mut probe = probe_with_columns();
        let now = Instant::now();
        probe.set_key(132, true, now);
        probe.set_key(132, false, now);
        // Within the hold window the pulse persists
        let line = probe.next_line(100, now + Duration::from_millis(100));
        assert!(line[20] > 0.8);
        // After the hold it decays back to baseline
        let line = probe.next_line(100, now + Duration::from_millis(400));
        assert!((line[20] - BASELINE).abs() < 1e-6);
    }

    #[test]
    fn envelope_activity_is_bounded_and_plausible() {
        let mut probe = probe_with_columns();
        probe.update_env(134, 0.8);
        let now = Instant::now();
        let mut lit_frames = 0;
        for _ in 0..60 {
            let line = probe.next_line(100, now);
            let v = line[80];
            if v > BASELINE {
                lit_frames += 1;
                // Pulse intensity follows the envelope formula
                assert!(v <= 0.22 + 0.65 * 0.8 + 1e-5, "got {v}");
            }
        }
        // The generator must produce both ON and GAP phases over 60 frames
        assert!(lit_frames > 0 && lit_frames < 60, "lit {lit_frames}/60");
    }

    #[test]
    fn sub_threshold_envelope_stays_dark() {
        let mut probe = probe_with_columns();
        probe.update_env(134, 0.01);
        let now = Instant::now();
        for _ in 0..20 {
            let line = probe.next_line(100, now);
            assert!((line[80] - BASELINE).abs() < 1e-6);
        }
    }

    #[test]
    fn centre_column_follows_gate() {
        let mut probe = probe_with_columns();
        let now = Instant::now();
        probe.set_gate_target(true);
        // Attack over a few frames
        let mut last = 0.0;
        for _ in 0..5 {
            let line = probe.next_line(100, now);
            assert!(line[50] >= last);
            last = line[50];
        }
        assert!(last > 0.8, "got {last}");

        probe.set_gate_target(false);
        for _ in 0..40 {
            probe.next_line(100, now);
        }
        let line = probe.next_line(100, now);
        assert!((line[50] - BASELINE).abs() < 1e-6, "got {}", line[50]);
    }

    #[test]
    fn deterministic_for_equal_seeds() {
        let run = || {
            let mut probe = probe_with_columns();
            probe.update_env(134, 0.5);
            let now = Instant::now();
            (0..30)
                .map(|_| probe.next_line(100, now))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn pulse_clips_at_line_edges() {
        let mut line = vec![0.0; 4];
        draw_pulse(&mut line, 0, 2, 1.0);
        assert!(line[0] > 0.0);
        let mut line = vec![0.0; 4];
        draw_pulse(&mut line, 3, 2, 1.0);
        assert!(line[3] > 0.0);
    }
}
