//! Timing player — the authoritative gate path
//!
//! Consumes mark/space duration sequences recovered from DATA records and
//! replays them in real time on a dedicated worker: gate edges at element
//! boundaries, element symbols at mark end, and level samples frequent
//! enough for a smooth S-meter. Audible CW stays in lock-step with the
//! network gate because the audio engine follows the same edges.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Level emission period while sleeping through an element
const LEVEL_PERIOD: Duration = Duration::from_millis(16);
/// Idle level emission period (~20 Hz)
const IDLE_PERIOD: Duration = Duration::from_millis(50);
/// Idle poll slice
const IDLE_SLICE: Duration = Duration::from_millis(2);
/// Tail below which the terminal sleep hands over to a spin wait
const SPIN_TAIL: Duration = Duration::from_micros(500);

/// Downstream consumer of the player's three signal streams.
pub trait PlayerSink: Send + Sync {
    /// Gate transition.
    fn gate(&self, _is_on: bool) {}

    /// Element classified at mark end: `'.'` or `'-'`.
    fn element(&self, _symbol: char) {}

    /// Level sample reflecting the current gate state.
    fn level(&self, _level: f32, _over: f32) {}

    /// Mark duration about to be played, milliseconds.
    fn mark_ms(&self, _ms: f32) {}

    /// Space duration about to be played, milliseconds.
    fn space_ms(&self, _ms: f32) {}

    /// Current dot estimate in seconds, for element classification.
    fn dot_seconds(&self) -> f32 {
        0.060
    }
}

pub struct TimingPlayer {
    tx: Sender<(u64, Vec<i32>)>,
    generation: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimingPlayer {
    /// Spawn the worker and return the handle used to feed it.
    pub fn start(sink: Arc<dyn PlayerSink>) -> Self {
        let (tx, rx) = unbounded();
        let generation = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let generation = generation.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("timing-player".into())
                .spawn(move || run(rx, generation, stop, sink))
                .expect("spawn timing-player")
        };

        Self {
            tx,
            generation,
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue one sequence of signed millisecond durations
    /// (positive = mark, negative = space).
    pub fn enqueue(&self, seq: Vec<i32>) {
        if seq.is_empty() {
            return;
        }
        let gen = self.generation.load(Ordering::Acquire);
        let _ = self.tx.send((gen, seq));
    }

    /// Drop everything not yet played, e.g. on a tune change.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Stop the worker. Pending sequences are abandoned; a final gate-off
    /// is emitted if the gate was left on.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TimingPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    rx: Receiver<(u64, Vec<i32>)>,
    generation: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    sink: Arc<dyn PlayerSink>,
) {
    let mut gate_on = false;
    let mut last_idle_emit = Instant::now();

    'outer: while !stop.load(Ordering::Relaxed) {
        let (gen, seq) = match rx.recv_timeout(IDLE_SLICE) {
            Ok(msg) => msg,
            Err(_) => {
                let now = Instant::now();
                if now.duration_since(last_idle_emit) >= IDLE_PERIOD {
                    sink.level(0.0, 0.0);
                    last_idle_emit = now;
                }
                continue;
            }
        };
        if gen < generation.load(Ordering::Acquire) {
            continue; // superseded by a clear()
        }

        for v in seq {
            if stop.load(Ordering::Relaxed) {
                break 'outer;
            }
            if v == 0 {
                continue;
            }

            if v > 0 {
                if !gate_on {
                    gate_on = true;
                    sink.gate(true);
                }
                let dur_ms = v as f32;
                sink.mark_ms(dur_ms);
                sleep_emitting_level(dur_ms, 1.0, &sink, &stop);
                if stop.load(Ordering::Relaxed) {
                    break 'outer; // truncated mark, don't classify it
                }
                let dot = sink.dot_seconds().clamp(0.020, 0.200);
                let symbol = if dur_ms / 1000.0 < 2.5 * dot { '.' } else { '-' };
                sink.element(symbol);
            } else {
                if gate_on {
                    gate_on = false;
                    sink.gate(false);
                }
                let dur_ms = (-v) as f32;
                sink.space_ms(dur_ms);
                sleep_emitting_level(dur_ms, 0.0, &sink, &stop);
            }
        }
    }

    if gate_on {
        sink.gate(false);
    }
}

/// Sleep for `ms` while emitting the current level every 16 ms. The last
/// stretch undershoots and spins out the tail to bound transition jitter.
fn sleep_emitting_level(ms: f32, level: f32, sink: &Arc<dyn PlayerSink>, stop: &AtomicBool) {
    let end = Instant::now() + Duration::from_secs_f32(ms / 1000.0);
    let mut next_emit = Instant::now();

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= end {
            return;
        }
        if now >= next_emit {
            sink.level(level, 0.0);
            next_emit = now + LEVEL_PERIOD;
        }
        let remain = end - now;
        if remain > Duration::from_millis(6) {
            thread::sleep(Duration::from_millis(4));
        } else {
            if remain > SPIN_TAIL {
                thread::sleep(remain - SPIN_TAIL);
            }
            while Instant::now() < end {
                std::hint::spin_loop();
            }
            return;
        }
    }
}
