//! Per-wire UDP endpoints
//!
//! The server binds subscription state to the datagram source address, so
//! the client keeps one socket per subscribed wire: a dedicated primary
//! socket for the centre wire plus one per wire of the scan window. Each
//! socket registers the same callsign once per wire.
//!
//! Sends never propagate errors; a lost CONNECT is repaired by the next
//! heartbeat, and the receive path simply sees silence.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};

use crate::constants::RECV_BUFFER_BYTES;
use crate::error::NetworkError;
use crate::protocol::{
    encode_identity, encode_short, wires_around, CMD_CONNECT, CMD_DISCONNECT,
};

/// One subscribed UDP endpoint.
pub struct WireSocket {
    sock: Arc<UdpSocket>,
    server: SocketAddr,
    wire: u32,
}

impl WireSocket {
    /// Open a non-blocking socket with a large receive buffer and
    /// subscribe it to `wire`.
    pub fn open(
        server: SocketAddr,
        wire: u32,
        callsign: &str,
        version: &str,
    ) -> Result<Self, NetworkError> {
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        // Bursty wires overrun the default buffer; a failed resize is
        // survivable, a failed bind is not
        let _ = raw.set_recv_buffer_size(RECV_BUFFER_BYTES);
        raw.set_nonblocking(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let any: SocketAddr = "0.0.0.0:0".parse().expect("static addr");
        raw.bind(&any.into())
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let this = Self {
            sock: Arc::new(raw.into()),
            server,
            wire,
        };
        this.subscribe(callsign, version);
        Ok(this)
    }

    /// CONNECT plus the identity record. Used for both the initial
    /// subscribe and the periodic heartbeat.
    pub fn subscribe(&self, callsign: &str, version: &str) {
        let _ = self
            .sock
            .send_to(&encode_short(CMD_CONNECT, self.wire as u16), self.server);
        let _ = self
            .sock
            .send_to(&encode_identity(callsign, version), self.server);
    }

    /// DISCONNECT(0), sent once at shutdown.
    pub fn disconnect(&self) {
        let _ = self
            .sock
            .send_to(&encode_short(CMD_DISCONNECT, 0), self.server);
    }

    pub fn wire(&self) -> u32 {
        self.wire
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.sock.clone()
    }
}

/// Owns every socket of the current subscription window.
pub struct SocketManager {
    server: SocketAddr,
    callsign: String,
    version: String,
    center: u32,
    span: u32,
    primary: WireSocket,
    sides: HashMap<u32, WireSocket>,
}

impl SocketManager {
    pub fn new(
        server: SocketAddr,
        center: u32,
        span: u32,
        callsign: String,
        version: String,
    ) -> Result<Self, NetworkError> {
        let primary = WireSocket::open(server, center, &callsign, &version)?;
        let mut manager = Self {
            server,
            callsign,
            version,
            center,
            span,
            primary,
            sides: HashMap::new(),
        };
        if span > 0 {
            manager.open_sides(&wires_around(center, span));
        }
        Ok(manager)
    }

    fn open_sides(&mut self, wires: &[u32]) {
        for &w in wires {
            if self.sides.contains_key(&w) {
                continue;
            }
            match WireSocket::open(self.server, w, &self.callsign, &self.version) {
                Ok(sock) => {
                    self.sides.insert(w, sock);
                }
                Err(e) => {
                    tracing::warn!("skipping wire {w}: {e}");
                }
            }
        }
    }

    /// Move the window to a new centre: close leaving wires, open
    /// entering wires, keep the rest, and reopen the primary socket
    /// unconditionally to reset server-side state.
    pub fn retune(&mut self, new_center: u32) {
        let new_set: Vec<u32> = if self.span > 0 {
            wires_around(new_center, self.span)
        } else {
            Vec::new()
        };
        self.sides.retain(|w, _| new_set.contains(w));
        self.open_sides(&new_set);

        match WireSocket::open(self.server, new_center, &self.callsign, &self.version) {
            Ok(primary) => self.primary = primary,
            Err(e) => {
                // Keep the old subscription alive rather than go deaf
                tracing::warn!("primary reopen for wire {new_center} failed: {e}");
            }
        }
        self.center = new_center;
        tracing::info!("retuned to wire {new_center}, window {:?}", self.open_wires());
    }

    /// Resend CONNECT and identity on every socket.
    pub fn heartbeat(&self) {
        self.primary.subscribe(&self.callsign, &self.version);
        for sock in self.sides.values() {
            sock.subscribe(&self.callsign, &self.version);
        }
    }

    /// DISCONNECT every socket. The sockets close when the manager drops.
    pub fn shutdown(&self) {
        self.primary.disconnect();
        for sock in self.sides.values() {
            sock.disconnect();
        }
    }

    pub fn center(&self) -> u32 {
        self.center
    }

    pub fn primary_socket(&self) -> Arc<UdpSocket> {
        self.primary.socket()
    }

    pub fn side_sockets(&self) -> Vec<(u32, Arc<UdpSocket>)> {
        self.sides
            .iter()
            .map(|(&w, s)| (w, s.socket()))
            .collect()
    }

    /// The subscribed scan window, sorted.
    pub fn open_wires(&self) -> Vec<u32> {
        let mut wires: Vec<u32> = self.sides.keys().copied().collect();
        wires.sort_unstable();
        wires
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_short, CMD_DATA, IDENT_LEN};
    use std::time::Duration;

    struct FakeServer {
        sock: UdpSocket,
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Short(u16, u16),
        Identity,
        Other(usize),
    }

    impl FakeServer {
        fn bind() -> Self {
            let sock = UdpSocket::bind("127.0.0.1:0").expect("bind fake server");
            sock.set_read_timeout(Some(Duration::from_millis(200)))
                .expect("read timeout");
            Self { sock }
        }

        fn addr(&self) -> SocketAddr {
            self.sock.local_addr().unwrap()
        }

        /// Read until the line goes quiet.
        fn drain(&self) -> Vec<Seen> {
            let mut out = Vec::new();
            let mut buf = [0u8; 2048];
            while let Ok((n, _)) = self.sock.recv_from(&mut buf) {
                out.push(match n {
                    4 => {
                        let (cmd, wire) = parse_short(&buf[..n]).unwrap();
                        Seen::Short(cmd, wire)
                    }
                    IDENT_LEN => {
                        assert_eq!(
                            u16::from_le_bytes([buf[0], buf[1]]),
                            CMD_DATA
                        );
                        Seen::Identity
                    }
                    other => Seen::Other(other),
                });
            }
            out
        }

        fn connects(&self) -> Vec<u16> {
            self.drain()
                .into_iter()
                .filter_map(|s| match s {
                    Seen::Short(CMD_CONNECT, wire) => Some(wire),
                    _ => None,
                })
                .collect()
        }
    }

    fn manager(server: &FakeServer, center: u32, span: u32) -> SocketManager {
        SocketManager::new(
            server.addr(),
            center,
            span,
            "TEST CALL".into(),
            "test 0.0".into(),
        )
        .expect("manager")
    }

    #[test]
    fn subscribe_covers_the_window() {
        let server = FakeServer::bind();
        let mgr = manager(&server, 133, 5);

        assert_eq!(mgr.open_wires(), (128..=138).collect::<Vec<u32>>());

        let mut connects = server.connects();
        connects.sort_unstable();
        // One CONNECT per window wire plus the dedicated primary
        for w in 128..=138u16 {
            assert!(connects.contains(&w), "missing CONNECT for {w}");
        }
        assert_eq!(connects.iter().filter(|&&w| w == 133).count(), 2);
    }

    #[test]
    fn identity_follows_every_connect() {
        let server = FakeServer::bind();
        let _mgr = manager(&server, 50, 2);

        let seen = server.drain();
        let connects = seen
            .iter()
            .filter(|s| matches!(s, Seen::Short(CMD_CONNECT, _)))
            .count();
        let identities = seen.iter().filter(|s| matches!(s, Seen::Identity)).count();
        assert_eq!(connects, identities);
        assert!(connects >= 5);
    }

    #[test]
    fn retune_shifts_the_window() {
        let server = FakeServer::bind();
        let mut mgr = manager(&server, 133, 5);
        server.drain();

        mgr.retune(135);
        assert_eq!(mgr.open_wires(), (130..=140).collect::<Vec<u32>>());

        let connects = server.connects();
        // Entering wires and the reopened primary subscribe afresh
        assert!(connects.contains(&139));
        assert!(connects.contains(&140));
        assert!(connects.contains(&135));
        // Leaving wires do not
        assert!(!connects.contains(&128));
        assert!(!connects.contains(&129));
    }

    #[test]
    fn span_zero_keeps_only_the_primary() {
        let server = FakeServer::bind();
        let mgr = manager(&server, 42, 0);
        assert!(mgr.open_wires().is_empty());
        assert_eq!(server.connects(), vec![42]);
    }

    #[test]
    fn heartbeat_reaches_every_socket() {
        let server = FakeServer::bind();
        let mgr = manager(&server, 133, 3);
        server.drain();

        mgr.heartbeat();
        let mut connects = server.connects();
        connects.sort_unstable();
        for w in 130..=136u16 {
            assert!(connects.contains(&w), "heartbeat missing wire {w}");
        }
        assert_eq!(connects.iter().filter(|&&w| w == 133).count(), 2);
    }

    #[test]
    fn shutdown_disconnects_every_socket() {
        let server = FakeServer::bind();
        let mgr = manager(&server, 10, 2);
        server.drain();

        mgr.shutdown();
        let seen = server.drain();
        let disconnects = seen
            .iter()
            .filter(|s| matches!(s, Seen::Short(CMD_DISCONNECT, 0)))
            .count();
        // Five window sockets plus the primary
        assert_eq!(disconnects, 6);
    }
}
