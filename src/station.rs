//! Receive-pipeline assembly
//!
//! Glues the wire client to the decoder, classifier, activity probe and
//! sidetone, and feeds the front panel through [`PanelSink`]. The routing
//! policy lives here: explicit mark/space timings are authoritative for
//! audio and the centre gate, while fallback keying edges drive them only
//! when no timing has been seen recently. Both paths always feed the
//! decoder, which owns its own dot estimate.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::audio::{SidetoneControl, SidetoneEngine};
use crate::constants::DEFAULT_TONE_HZ;
use crate::decode::{AdaptiveDecoder, DecodeSink, SenderClassifier, SenderMode};
use crate::error::Result;
use crate::events::{PanelSink, WireEvents};
use crate::network::client::{ClientConfig, WireClient};
use crate::probe::ActivityProbe;
use crate::protocol::wires_around;
use crate::tx::{StraightKey, TxEncoder};

/// Fallback edges drive audio only when no timing hint arrived within this
/// window (microseconds).
const TIMING_FRESH_US: u64 = 500_000;

/// S-meter smoothing: fast attack, soft release
const SMETER_ATTACK: f32 = 0.58;
const SMETER_RELEASE: f32 = 0.12;

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub client: ClientConfig,
    /// Pixel width of the waterfall line fed to the panel
    pub waterfall_width: usize,
    /// Title prefix for the mode badge
    pub name: String,
    pub tone_hz: f32,
    /// Volume knob position, 0..100
    pub volume: u32,
}

impl StationConfig {
    pub fn new(host: impl Into<String>, center_wire: u32) -> Self {
        Self {
            client: ClientConfig::new(host, center_wire),
            waterfall_width: 800,
            name: "CW Wire Client".into(),
            tone_hz: DEFAULT_TONE_HZ,
            volume: 55,
        }
    }
}

/// Forwards decoded symbols and characters to the panel text view.
struct PanelDecodeSink {
    panel: Arc<dyn PanelSink>,
}

impl DecodeSink for PanelDecodeSink {
    fn on_symbol(&self, symbol: char) {
        let mut buf = [0u8; 4];
        self.panel.append_text(symbol.encode_utf8(&mut buf));
    }
    fn on_text(&self, text: &str) {
        self.panel.append_text(text);
    }
}

struct StationShared {
    panel: Arc<dyn PanelSink>,
    decoder: Mutex<AdaptiveDecoder>,
    classifier: Mutex<SenderClassifier>,
    probe: Mutex<ActivityProbe>,
    audio: SidetoneControl,

    /// f32 bit patterns
    s_target: AtomicU32,
    s_ema: AtomicU32,
    /// Micros since `epoch` of the last timing hint; 0 = never
    timing_seen_us: AtomicU64,
    epoch: Instant,

    badge: Mutex<SenderMode>,
    name: String,
    center: AtomicU32,
    span: u32,
    width: usize,
}

impl StationShared {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Timing mode holds for half a second past the last explicit hint.
    fn using_timings(&self) -> bool {
        let seen = self.timing_seen_us.load(Ordering::Relaxed);
        seen != 0 && self.now_us().saturating_sub(seen) < TIMING_FRESH_US
    }

    fn mark_timing_seen(&self) {
        self.timing_seen_us.store(self.now_us().max(1), Ordering::Relaxed);
    }

    fn load_f32(cell: &AtomicU32) -> f32 {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }

    fn store_f32(cell: &AtomicU32, v: f32) {
        cell.store(v.to_bits(), Ordering::Relaxed);
    }

    fn bump_smeter(&self) {
        let s = Self::load_f32(&self.s_target);
        Self::store_f32(&self.s_target, (0.85 * s + 0.35).min(1.0));
    }

    fn update_badge(&self) {
        let (mode, wpm) = self.classifier.lock().unwrap().get();
        if mode == SenderMode::Unknown {
            return;
        }
        let mut badge = self.badge.lock().unwrap();
        if *badge == mode {
            return;
        }
        *badge = mode;
        self.panel.set_title(&format!(
            "{} — RX: {} ~{} WPM",
            self.name,
            mode.as_str(),
            wpm.round() as u32
        ));
    }
}

impl WireEvents for StationShared {
    fn on_env(&self, wire: u32, env: f32) {
        self.probe.lock().unwrap().update_env(wire, env);
    }

    fn on_key(&self, wire: u32, is_on: bool) {
        self.probe.lock().unwrap().set_key(wire, is_on, Instant::now());
    }

    fn on_center_level(&self, level: f32, _over: f32) {
        Self::store_f32(&self.s_target, level);
    }

    fn on_center_keying(&self, is_on: bool) {
        self.decoder.lock().unwrap().key_edge(is_on, Instant::now());
        // Fallback edges gate audio and the waterfall body only when the
        // timing path has gone quiet
        if !self.using_timings() {
            self.audio.rx_key(is_on);
            self.probe.lock().unwrap().set_gate_target(is_on);
        }
    }

    fn on_center_element(&self, symbol: char) {
        // The decoder's own classification feeds the panel; the client's
        // element stream is surfaced for hosts that want raw elements
        tracing::trace!("element {symbol}");
    }

    fn on_center_mark_ms(&self, ms: f32) {
        self.mark_timing_seen();
        self.audio.clear_rx_mute();
        self.audio.rx_key(true);
        self.probe.lock().unwrap().set_gate_target(true);

        let dot = {
            let mut decoder = self.decoder.lock().unwrap();
            decoder.hint_mark_ms(ms);
            decoder.dot_seconds()
        };
        self.audio.set_dot_seconds(dot);

        self.classifier.lock().unwrap().update_mark_ms(ms);
        self.update_badge();
        self.bump_smeter();
    }

    fn on_center_space_ms(&self, ms: f32) {
        self.mark_timing_seen();
        self.audio.rx_key(false);
        self.probe.lock().unwrap().set_gate_target(false);
        self.decoder.lock().unwrap().hint_space_ms(ms);
        self.classifier.lock().unwrap().update_space_ms(ms);
        self.update_badge();
        // Suppress re-ignition races for most of the announced space
        self.audio.mute_rx_for(ms);
    }
}

type TxEdge = Box<dyn FnMut(bool, Instant) + Send>;

pub struct Station {
    shared: Arc<StationShared>,
    client: WireClient,
    audio: SidetoneEngine,
    key: Mutex<StraightKey>,
    encoder: Mutex<TxEncoder<TxEdge>>,
}

impl Station {
    pub fn new(config: StationConfig, panel: Arc<dyn PanelSink>) -> Result<Self> {
        let mut audio = SidetoneEngine::new(config.tone_hz, config.volume);
        audio.start();

        let shared = Arc::new(StationShared {
            panel: panel.clone(),
            decoder: Mutex::new(AdaptiveDecoder::new(Arc::new(PanelDecodeSink {
                panel: panel.clone(),
            }))),
            classifier: Mutex::new(SenderClassifier::new()),
            probe: Mutex::new(ActivityProbe::new(config.client.center_wire)),
            audio: audio.control(),
            s_target: AtomicU32::new(0.0f32.to_bits()),
            s_ema: AtomicU32::new(0.0f32.to_bits()),
            timing_seen_us: AtomicU64::new(0),
            epoch: Instant::now(),
            badge: Mutex::new(SenderMode::Unknown),
            name: config.name.clone(),
            center: AtomicU32::new(config.client.center_wire),
            span: config.client.span,
            width: config.waterfall_width,
        });

        let mut client = WireClient::new(config.client, shared.clone())?;
        client.start();

        let edge_target = shared.clone();
        let encoder: TxEncoder<TxEdge> = TxEncoder::new(Box::new(move |is_on, t| {
            edge_target.decoder.lock().unwrap().key_edge(is_on, t);
            edge_target.audio.tx_key(is_on);
            edge_target.probe.lock().unwrap().set_gate_target(is_on);
        }));

        panel.set_channel_display(shared.center.load(Ordering::Relaxed));
        panel.set_marker_fraction(0.5);

        Ok(Self {
            shared,
            client,
            audio,
            key: Mutex::new(StraightKey::new()),
            encoder: Mutex::new(encoder),
        })
    }

    /// Drive the UI-rate work: decoder idle flushes, the waterfall line
    /// and the smoothed S-meter. Call at roughly 30 Hz.
    pub fn ui_tick(&self) {
        let now = Instant::now();
        self.shared.decoder.lock().unwrap().idle_tick(now);

        let center = self.shared.center.load(Ordering::Relaxed);
        let wires = wires_around(center, self.shared.span);
        let width = self.shared.width;
        let line = {
            let mut probe = self.shared.probe.lock().unwrap();
            probe.set_columns(
                wires
                    .iter()
                    .zip(columns_evenly_spaced(wires.len(), width))
                    .map(|(&w, x)| (w, x))
                    .collect(),
            );
            probe.next_line(width, now)
        };
        self.shared.panel.set_waterfall_line(&line);

        let target = StationShared::load_f32(&self.shared.s_target);
        let mut ema = StationShared::load_f32(&self.shared.s_ema);
        let k = if target > ema { SMETER_ATTACK } else { SMETER_RELEASE };
        ema += (target - ema) * k;
        StationShared::store_f32(&self.shared.s_ema, ema);
        self.shared.panel.set_smeter(ema, 0.0);
    }

    /// Retune the primary wire and recentre the display.
    pub fn set_center(&self, wire: u32) {
        self.client.set_center_wire(wire);
        self.shared.center.store(wire, Ordering::Relaxed);
        self.shared.probe.lock().unwrap().set_center(wire);
        self.shared.panel.set_channel_display(wire);
        self.shared.panel.set_marker_fraction(0.5);
    }

    pub fn set_volume(&self, knob: u32) {
        self.shared.audio.set_volume(knob);
    }

    pub fn set_tone_hz(&self, hz: f32) {
        self.shared.audio.set_tone_hz(hz);
    }

    /// Straight-key press (spacebar down).
    pub fn key_down(&self) {
        let now = Instant::now();
        if self.key.lock().unwrap().press(now) {
            self.encoder.lock().unwrap().key_down(now);
        }
    }

    /// Straight-key release (spacebar up).
    pub fn key_up(&self) {
        let now = Instant::now();
        if self.key.lock().unwrap().release(now) {
            self.encoder.lock().unwrap().key_up(now);
        }
    }

    /// Decoder speed estimate.
    pub fn wpm(&self) -> f32 {
        self.shared.decoder.lock().unwrap().wpm()
    }

    /// Classifier verdict and WPM.
    pub fn sender(&self) -> (SenderMode, f32) {
        self.shared.classifier.lock().unwrap().get()
    }

    pub fn stop(&mut self) {
        self.client.stop();
        self.audio.stop();
    }
}

fn columns_evenly_spaced(n: usize, width: usize) -> Vec<usize> {
    if n <= 1 {
        return vec![width / 2];
    }
    let step = width as f32 / (n + 1) as f32;
    (0..n).map(|i| ((i + 1) as f32 * step) as usize).collect()
}
