//! Wire client: the worker assembly behind [`WireEvents`]
//!
//! Three workers plus the timing player cooperate around one stop flag:
//!
//! * the primary RX worker parses DATA records from the centre wire and
//!   either feeds the timing player (authoritative path) or infers gate
//!   edges from packet arrivals (fallback path);
//! * the side-scan worker drains the neighbour sockets, maintaining the
//!   per-wire envelope and keying latch the activity probe consumes;
//! * the heartbeat worker re-registers every socket within the server's
//!   subscription timeout.
//!
//! No worker blocks longer than one readiness timeout, and no shared lock
//! is held across a sleep.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_SPAN, HEARTBEAT_SECS, MAX_DATAGRAM, RELAY_PORT};
use crate::error::{ClientError, NetworkError, Result};
use crate::events::WireEvents;
use crate::keying::{FallbackGate, GateEvent, PlayerSink, TimingPlayer};
use crate::network::socket::SocketManager;
use crate::protocol::{clean_host, extract_timings, wires_around};

/// Client-side dot estimate bounds (seconds)
const DOT_EST_MIN: f32 = 0.028;
const DOT_EST_MAX: f32 = 0.320;
const DOT_EST_SEED: f32 = 0.060;

/// Readiness budget for the primary socket
const PRIMARY_POLL: Duration = Duration::from_millis(6);
/// Envelope decay / latch expiry period
const DECAY_TICK: Duration = Duration::from_millis(16);
/// Packets closer than this are one burst
const BURST_GAP: Duration = Duration::from_millis(120);
/// A latched neighbour drops after this much silence
const LATCH_EXPIRY: Duration = Duration::from_millis(200);
/// Envelope decay factors per tick
const DECAY_PRIMARY: f32 = 0.92;
const DECAY_SIDE: f32 = 0.90;
/// Envelope bump per packet arrival
const ARRIVAL_BUMP: f32 = 0.45;

/// Connection parameters for [`WireClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub center_wire: u32,
    pub span: u32,
    pub callsign: String,
    pub version: String,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, center_wire: u32) -> Self {
        Self {
            host: host.into(),
            center_wire,
            span: DEFAULT_SPAN,
            callsign: "TWI Client".into(),
            version: concat!("cw-wire-client ", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Default)]
struct SideState {
    env: f32,
    key_on: bool,
    last_packet: Option<Instant>,
}

struct ClientShared {
    stop: AtomicBool,
    manager: Mutex<SocketManager>,
    events: Arc<dyn WireEvents>,
    /// f32 bit pattern; racy updates tolerated, values bounded
    dot_est_bits: AtomicU32,
    /// Bumped on retune so the primary worker resets its gate
    retune_epoch: AtomicU64,
    sides: Mutex<HashMap<u32, SideState>>,
    center: AtomicU32,
    span: u32,
}

impl ClientShared {
    fn dot_est(&self) -> f32 {
        f32::from_bits(self.dot_est_bits.load(Ordering::Relaxed))
    }

    fn set_dot_est(&self, v: f32) {
        self.dot_est_bits
            .store(v.clamp(DOT_EST_MIN, DOT_EST_MAX).to_bits(), Ordering::Relaxed);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Forwards player signals to the host and serves the dot estimate.
struct ClientPlayerSink {
    shared: Arc<ClientShared>,
}

impl PlayerSink for ClientPlayerSink {
    fn gate(&self, is_on: bool) {
        self.shared.events.on_center_keying(is_on);
    }
    fn element(&self, symbol: char) {
        self.shared.events.on_center_element(symbol);
    }
    fn level(&self, level: f32, over: f32) {
        self.shared.events.on_center_level(level, over);
    }
    fn mark_ms(&self, ms: f32) {
        self.shared.events.on_center_mark_ms(ms);
    }
    fn space_ms(&self, ms: f32) {
        self.shared.events.on_center_space_ms(ms);
    }
    fn dot_seconds(&self) -> f32 {
        self.shared.dot_est()
    }
}

pub struct WireClient {
    shared: Arc<ClientShared>,
    player: Arc<TimingPlayer>,
    workers: Vec<JoinHandle<()>>,
    started: bool,
}

impl WireClient {
    /// Resolve the relay host and subscribe the whole window. Fails
    /// synchronously on an invalid centre wire or an unresolvable host.
    pub fn new(config: ClientConfig, events: Arc<dyn WireEvents>) -> Result<Self> {
        if config.center_wire == 0 {
            return Err(ClientError::InvalidWire(config.center_wire).into());
        }

        let host = clean_host(&config.host);
        let server = resolve(&host)?;
        let manager = SocketManager::new(
            server,
            config.center_wire,
            config.span,
            config.callsign.clone(),
            config.version.clone(),
        )?;

        let mut sides = HashMap::new();
        for w in wires_around(config.center_wire, config.span) {
            sides.insert(w, SideState::default());
        }

        let shared = Arc::new(ClientShared {
            stop: AtomicBool::new(false),
            manager: Mutex::new(manager),
            events,
            dot_est_bits: AtomicU32::new(DOT_EST_SEED.to_bits()),
            retune_epoch: AtomicU64::new(0),
            sides: Mutex::new(sides),
            center: AtomicU32::new(config.center_wire),
            span: config.span,
        });

        let player = Arc::new(TimingPlayer::start(Arc::new(ClientPlayerSink {
            shared: shared.clone(),
        })));

        Ok(Self {
            shared,
            player,
            workers: Vec::new(),
            started: false,
        })
    }

    /// Spawn the worker threads. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let spawn = |name: &str, f: Box<dyn FnOnce() + Send>| {
            thread::Builder::new()
                .name(name.into())
                .spawn(f)
                .expect("spawn worker")
        };

        let shared = self.shared.clone();
        let player = self.player.clone();
        self.workers.push(spawn(
            "primary-rx",
            Box::new(move || primary_rx_loop(shared, player)),
        ));

        let shared = self.shared.clone();
        self.workers
            .push(spawn("side-scan", Box::new(move || side_scan_loop(shared))));

        let shared = self.shared.clone();
        self.workers
            .push(spawn("heartbeat", Box::new(move || heartbeat_loop(shared))));

        tracing::info!(
            "wire client running, centre {} span {}",
            self.shared.center.load(Ordering::Relaxed),
            self.shared.span
        );
    }

    /// Retune the window. Sockets for leaving wires close, entering wires
    /// subscribe, and the primary socket is reopened to reset server
    /// state. Queued timing sequences are abandoned.
    pub fn set_center_wire(&self, new_center: u32) {
        if new_center == 0 {
            tracing::warn!("ignoring retune to wire 0");
            return;
        }
        if new_center == self.shared.center.load(Ordering::Relaxed) {
            return;
        }

        self.shared.manager.lock().unwrap().retune(new_center);
        self.shared.center.store(new_center, Ordering::Relaxed);

        let window = wires_around(new_center, self.shared.span);
        {
            let mut sides = self.shared.sides.lock().unwrap();
            sides.retain(|w, _| window.contains(w));
            for w in &window {
                sides.entry(*w).or_default();
            }
        }

        self.shared.retune_epoch.fetch_add(1, Ordering::AcqRel);
        self.player.clear();
        self.shared.events.on_center_keying(false);
    }

    pub fn center_wire(&self) -> u32 {
        self.shared.center.load(Ordering::Relaxed)
    }

    /// The client's adaptive dot estimate in seconds.
    pub fn dot_estimate(&self) -> f32 {
        self.shared.dot_est()
    }

    /// The currently subscribed scan window (primary excluded).
    pub fn open_wires(&self) -> Vec<u32> {
        self.shared.manager.lock().unwrap().open_wires()
    }

    /// Orderly teardown: flag the workers, send DISCONNECT everywhere,
    /// join, and let the player emit its final gate-off.
    pub fn stop(&mut self) {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.manager.lock().unwrap().shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.player.stop();
        tracing::info!("wire client stopped");
    }
}

impl Drop for WireClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve(host: &str) -> Result<SocketAddr> {
    (host, RELAY_PORT)
        .to_socket_addrs()
        .map_err(|e| NetworkError::ResolveFailed(format!("{host}: {e}")))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| NetworkError::ResolveFailed(format!("{host}: no IPv4 address")).into())
}

/// Try to receive within a readiness budget, sleeping in 1 ms slices.
fn poll_recv(
    sock: &UdpSocket,
    buf: &mut [u8],
    budget: Duration,
    stop: &AtomicBool,
) -> Option<usize> {
    let deadline = Instant::now() + budget;
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match sock.recv_from(buf) {
            Ok((n, _)) => return Some(n),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(1));
            }
            // Transient errors retry on the next readiness pass
            Err(_) => return None,
        }
    }
}

fn primary_rx_loop(shared: Arc<ClientShared>, player: Arc<TimingPlayer>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut gate = FallbackGate::new();
    let mut epoch = shared.retune_epoch.load(Ordering::Acquire);

    while !shared.stopped() {
        let current = shared.retune_epoch.load(Ordering::Acquire);
        if current != epoch {
            epoch = current;
            gate.reset();
        }

        let sock = shared.manager.lock().unwrap().primary_socket();
        let Some(n) = poll_recv(&sock, &mut buf, PRIMARY_POLL, &shared.stop) else {
            continue;
        };
        if n < 4 {
            continue;
        }

        if let Some(seq) = extract_timings(&buf[..n]) {
            // The shortest mark in a burst is the best dot evidence
            if let Some(&min_mark) = seq.iter().filter(|&&v| v > 0).min() {
                let m = min_mark as f32 / 1000.0;
                shared.set_dot_est(0.85 * shared.dot_est() + 0.15 * m);
            }
            player.enqueue(seq);
            continue;
        }

        // Fallback per-arrival gating: the packet itself is the keying
        let now = Instant::now();
        if let Some(GateEvent::On) = gate.on_packet(now) {
            shared.events.on_center_keying(true);
        }

        // Swallow the rest of the burst so latency does not accumulate
        let mut drained = 0;
        while drained < 8 {
            match sock.recv_from(&mut buf) {
                Ok((m, _)) if m > 0 => {
                    gate.touch(Instant::now());
                    drained += 1;
                }
                _ => break,
            }
        }

        // Hold the element open while fresh bytes keep arriving
        let thr = FallbackGate::off_threshold(shared.dot_est());
        let mut end = gate.last_activity().unwrap_or(now) + thr;
        while Instant::now() < end && !shared.stopped() {
            match sock.recv_from(&mut buf) {
                Ok((m, _)) if m > 0 => {
                    let t = Instant::now();
                    gate.touch(t);
                    end = t + thr;
                }
                _ => thread::sleep(Duration::from_micros(600)),
            }
        }

        if let Some(GateEvent::Off { symbol }) = gate.check_off(Instant::now(), shared.dot_est())
        {
            shared.events.on_center_keying(false);
            shared.events.on_center_element(symbol);
        }
    }
}

fn side_scan_loop(shared: Arc<ClientShared>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut last_decay = Instant::now();

    while !shared.stopped() {
        let now = Instant::now();
        if now.duration_since(last_decay) >= DECAY_TICK {
            let center = shared.center.load(Ordering::Relaxed);
            let mut dropped = Vec::new();
            let mut snapshot = Vec::new();
            {
                let mut sides = shared.sides.lock().unwrap();
                for (&w, st) in sides.iter_mut() {
                    st.env *= if w == center { DECAY_PRIMARY } else { DECAY_SIDE };
                    if st.key_on
                        && st
                            .last_packet
                            .is_some_and(|p| now.duration_since(p) > LATCH_EXPIRY)
                    {
                        st.key_on = false;
                        dropped.push(w);
                    }
                    snapshot.push((w, st.env));
                }
            }
            for w in dropped {
                shared.events.on_key(w, false);
            }
            for (w, env) in snapshot {
                shared.events.on_env(w, env);
            }
            last_decay = now;
        }

        let sockets = shared.manager.lock().unwrap().side_sockets();
        if sockets.is_empty() {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let mut raised = Vec::new();
        for (w, sock) in sockets {
            let mut drained = 0;
            while drained < 6 {
                match sock.recv_from(&mut buf) {
                    Ok((n, _)) if n > 0 => {
                        let t = Instant::now();
                        let mut sides = shared.sides.lock().unwrap();
                        let st = sides.entry(w).or_default();
                        let burst = st
                            .last_packet
                            .is_some_and(|p| t.duration_since(p) < BURST_GAP);
                        st.env = (st.env + ARRIVAL_BUMP).min(1.0);
                        if burst {
                            st.env = st.env.max(0.95);
                            if !st.key_on {
                                st.key_on = true;
                                raised.push(w);
                            }
                        }
                        st.last_packet = Some(t);
                        drained += 1;
                    }
                    _ => break,
                }
            }
        }
        for w in raised {
            shared.events.on_key(w, true);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn heartbeat_loop(shared: Arc<ClientShared>) {
    loop {
        // Sleep in slices so stop is honoured promptly
        for _ in 0..(HEARTBEAT_SECS * 4) {
            if shared.stopped() {
                return;
            }
            thread::sleep(Duration::from_millis(250));
        }
        shared.manager.lock().unwrap().heartbeat();
        tracing::debug!("heartbeat sent on every subscribed socket");
    }
}
