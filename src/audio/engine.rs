//! CW sidetone engine
//!
//! A single real-time callback advances a sine phase accumulator gated by
//! two independent one-pole envelopes, one following the RX gate and one
//! the local TX key. The callback reads nothing but atomics; every control
//! surface is a plain scalar store. Attack is fixed at 3 ms; release
//! follows the current dot length so fast CW releases crisply and slow CW
//! keeps its tail.
//!
//! If no output device can be opened the engine stays in a disabled state
//! and every control becomes a no-op; the rest of the pipeline is
//! unaffected.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::constants::{SIDETONE_BLOCK, SIDETONE_SAMPLE_RATE};
use crate::error::AudioError;

const ATTACK_S: f32 = 0.003;
const RELEASE_MIN_S: f32 = 0.004;
const RELEASE_MAX_S: f32 = 0.016;
const TONE_MIN_HZ: f32 = 200.0;
const TONE_MAX_HZ: f32 = 1400.0;
const TX_MIX: f32 = 0.90;
/// Longest forced-silence window after a space
const MUTE_CAP_S: f32 = 0.5;

/// One-pole coefficient for a time constant at the given sample rate.
fn one_pole_coef(tau_s: f32, sample_rate: f32) -> f32 {
    let tau = tau_s.max(1e-4);
    1.0 - (-1.0 / (tau * sample_rate)).exp()
}

/// Release time constant derived from the dot length.
fn release_tau(dot_s: f32) -> f32 {
    (0.40 * dot_s).clamp(RELEASE_MIN_S, RELEASE_MAX_S)
}

/// Volume knob mapping from the 0..100 panel range.
fn map_volume(v: u32) -> f32 {
    let v = v.min(100);
    0.001 + 0.50 * (v as f32 / 100.0)
}

/// Hard-mute window for a space of the given length.
fn mute_window(space_ms: f32) -> Duration {
    Duration::from_secs_f32((0.9 * space_ms / 1000.0).min(MUTE_CAP_S).max(0.0))
}

/// Shared between the control surface and the audio callback.
struct EngineState {
    rx_target: AtomicBool,
    tx_target: AtomicBool,
    /// f32 bit patterns
    tone_hz: AtomicU32,
    volume: AtomicU32,
    attack_k: AtomicU32,
    release_k: AtomicU32,
    /// Microseconds since `epoch`; RX key-on requests are refused until then
    hard_mute_until_us: AtomicU64,
    epoch: Instant,
    enabled: AtomicBool,
}

impl EngineState {
    fn load_f32(cell: &AtomicU32) -> f32 {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }

    fn store_f32(cell: &AtomicU32, v: f32) {
        cell.store(v.to_bits(), Ordering::Relaxed);
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn rx_muted(&self) -> bool {
        self.now_us() < self.hard_mute_until_us.load(Ordering::Relaxed)
    }
}

/// Cheap handle for the control surface; safe to share across workers.
#[derive(Clone)]
pub struct SidetoneControl {
    state: Arc<EngineState>,
}

impl SidetoneControl {
    /// RX gate request. While the hard-mute window is open, key-on is
    /// forced off to suppress re-ignition races during a space.
    pub fn rx_key(&self, is_on: bool) {
        let on = is_on && !self.state.rx_muted();
        self.state.rx_target.store(on, Ordering::Relaxed);
    }

    /// Local TX key.
    pub fn tx_key(&self, is_on: bool) {
        self.state.tx_target.store(is_on, Ordering::Relaxed);
    }

    /// Open the hard-mute window for a space of `space_ms` milliseconds.
    pub fn mute_rx_for(&self, space_ms: f32) {
        let until = self.state.now_us() + mute_window(space_ms).as_micros() as u64;
        self.state.hard_mute_until_us.store(until, Ordering::Relaxed);
        self.state.rx_target.store(false, Ordering::Relaxed);
    }

    /// Close the hard-mute window (a mark arrived; the space is over).
    pub fn clear_rx_mute(&self) {
        self.state.hard_mute_until_us.store(0, Ordering::Relaxed);
    }

    pub fn set_volume(&self, knob: u32) {
        EngineState::store_f32(&self.state.volume, map_volume(knob));
    }

    pub fn set_tone_hz(&self, hz: f32) {
        EngineState::store_f32(&self.state.tone_hz, hz.clamp(TONE_MIN_HZ, TONE_MAX_HZ));
    }

    /// Adapt the release tail to the current dot length.
    pub fn set_dot_seconds(&self, dot_s: f32) {
        let dot = dot_s.clamp(0.020, 0.220);
        let k = one_pole_coef(release_tau(dot), SIDETONE_SAMPLE_RATE as f32);
        EngineState::store_f32(&self.state.release_k, k);
    }

    /// False when no output device could be opened.
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Relaxed)
    }

    /// Current RX envelope target.
    pub fn rx_keyed(&self) -> bool {
        self.state.rx_target.load(Ordering::Relaxed)
    }

    /// Current TX envelope target.
    pub fn tx_keyed(&self) -> bool {
        self.state.tx_target.load(Ordering::Relaxed)
    }
}

pub struct SidetoneEngine {
    control: SidetoneControl,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SidetoneEngine {
    /// Build the shared state without touching the device.
    pub fn new(tone_hz: f32, volume_knob: u32) -> Self {
        let sr = SIDETONE_SAMPLE_RATE as f32;
        let state = Arc::new(EngineState {
            rx_target: AtomicBool::new(false),
            tx_target: AtomicBool::new(false),
            tone_hz: AtomicU32::new(tone_hz.clamp(TONE_MIN_HZ, TONE_MAX_HZ).to_bits()),
            volume: AtomicU32::new(map_volume(volume_knob).to_bits()),
            attack_k: AtomicU32::new(one_pole_coef(ATTACK_S, sr).to_bits()),
            release_k: AtomicU32::new(one_pole_coef(0.006, sr).to_bits()),
            hard_mute_until_us: AtomicU64::new(0),
            epoch: Instant::now(),
            enabled: AtomicBool::new(false),
        });
        Self {
            control: SidetoneControl { state },
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn control(&self) -> SidetoneControl {
        self.control.clone()
    }

    /// Open the output stream on a dedicated thread. Device failure is not
    /// an error: the engine just stays disabled.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.control.state.clone();
        let running = self.running.clone();

        let worker = thread::Builder::new()
            .name("sidetone".into())
            .spawn(move || match build_stream(&state) {
                Ok(stream) => {
                    if let Err(e) = stream.play() {
                        tracing::warn!("sidetone stream failed to start: {e}");
                        state.enabled.store(false, Ordering::Relaxed);
                        return;
                    }
                    state.enabled.store(true, Ordering::Relaxed);
                    while running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    // Stream drops here, closing the device
                }
                Err(e) => {
                    tracing::warn!("sidetone disabled: {e}");
                    state.enabled.store(false, Ordering::Relaxed);
                }
            });

        match worker {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                tracing::warn!("sidetone thread failed to spawn: {e}");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.control.state.enabled.store(false, Ordering::Relaxed);
    }
}

impl Drop for SidetoneEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(state: &Arc<EngineState>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SIDETONE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Fixed(SIDETONE_BLOCK),
    };

    let state = state.clone();
    let mut phase = 0.0f32;
    let mut rx_env = 0.0f32;
    let mut tx_env = 0.0f32;
    let sr = SIDETONE_SAMPLE_RATE as f32;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let tone = EngineState::load_f32(&state.tone_hz);
                let vol = EngineState::load_f32(&state.volume);
                let attack = EngineState::load_f32(&state.attack_k);
                let release = EngineState::load_f32(&state.release_k);
                let rx_t = if state.rx_target.load(Ordering::Relaxed) { 1.0 } else { 0.0 };
                let tx_t = if state.tx_target.load(Ordering::Relaxed) { 1.0 } else { 0.0 };

                let step = std::f32::consts::TAU * tone / sr;
                for sample in data.iter_mut() {
                    rx_env += (rx_t - rx_env) * if rx_t > rx_env { attack } else { release };
                    tx_env += (tx_t - tx_env) * if tx_t > tx_env { attack } else { release };
                    let sig = vol * (rx_env + TX_MIX * tx_env) * phase.sin();
                    *sample = sig.tanh();
                    phase += step;
                    if phase >= std::f32::consts::TAU {
                        phase -= std::f32::consts::TAU;
                    }
                }
            },
            move |err| {
                tracing::warn!("sidetone stream error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok(stream)
}
