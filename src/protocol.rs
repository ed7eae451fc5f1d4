//! Wire protocol for the CW relay service
//!
//! Two datagram shapes, both little-endian: a 4-byte short record
//! (`u16 command, u16 wire`) used for subscribe/heartbeat/unsubscribe, and a
//! 496-byte identity record carrying the station callsign and client version.
//! Incoming DATA records may embed a mark/space timing sequence at an
//! ambiguous offset and integer width; [`extract_timings`] recovers it by
//! ranked scan rather than by parsing a fixed layout.

use bytes::Bytes;

/// DISCONNECT command word
pub const CMD_DISCONNECT: u16 = 2;
/// DATA command word (identity records and keying data)
pub const CMD_DATA: u16 = 3;
/// CONNECT command word (subscribe and heartbeat)
pub const CMD_CONNECT: u16 = 4;
/// ACK command word (server side, never sent by this client)
pub const CMD_ACK: u16 = 5;

/// Size of the long identity record
pub const IDENT_LEN: usize = 496;

const IDENT_STATION_OFF: usize = 4;
const IDENT_SEQUENCE_OFF: usize = 356;
const IDENT_VERSION_OFF: usize = 360;
const IDENT_FIELD_LEN: usize = 128;

/// Mark/space durations outside this range are implausible (milliseconds).
const MIN_ELEMENT_MS: i32 = 2;
const MAX_ELEMENT_MS: i32 = 4000;

/// Encode a 4-byte short record.
pub fn encode_short(cmd: u16, wire: u16) -> Bytes {
    let mut out = [0u8; 4];
    out[0..2].copy_from_slice(&cmd.to_le_bytes());
    out[2..4].copy_from_slice(&wire.to_le_bytes());
    Bytes::copy_from_slice(&out)
}

/// Parse a short record. Returns `(command, wire)`.
pub fn parse_short(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() < 4 {
        return None;
    }
    let cmd = u16::from_le_bytes([data[0], data[1]]);
    let wire = u16::from_le_bytes([data[2], data[3]]);
    Some((cmd, wire))
}

/// Write a NUL-padded ASCII field, truncated to 127 bytes.
fn put_ascii_field(buf: &mut [u8], offset: usize, text: &str) {
    let ascii: Vec<u8> = text
        .chars()
        .filter(|c| c.is_ascii())
        .take(IDENT_FIELD_LEN - 1)
        .map(|c| c as u8)
        .collect();
    buf[offset..offset + ascii.len()].copy_from_slice(&ascii);
}

/// Encode the 496-byte identity record sent after each CONNECT.
///
/// The sequence field at offset 356 is always zero; the server's use of it
/// is undocumented and the value is preserved as-is.
pub fn encode_identity(station: &str, version: &str) -> Bytes {
    let mut pkt = vec![0u8; IDENT_LEN];
    pkt[0..2].copy_from_slice(&CMD_DATA.to_le_bytes());
    put_ascii_field(&mut pkt, IDENT_STATION_OFF, station);
    pkt[IDENT_SEQUENCE_OFF..IDENT_SEQUENCE_OFF + 4].copy_from_slice(&0u32.to_le_bytes());
    put_ascii_field(&mut pkt, IDENT_VERSION_OFF, version);
    Bytes::from(pkt)
}

/// Parsed identity record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub station: String,
    pub version: String,
    pub sequence: u32,
}

fn ascii_field(data: &[u8], offset: usize) -> String {
    let field = &data[offset..offset + IDENT_FIELD_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(IDENT_FIELD_LEN);
    field[..end].iter().map(|&b| b as char).collect()
}

/// Parse an identity record.
pub fn parse_identity(data: &[u8]) -> Option<Identity> {
    if data.len() < IDENT_LEN {
        return None;
    }
    let cmd = u16::from_le_bytes([data[0], data[1]]);
    if cmd != CMD_DATA {
        return None;
    }
    Some(Identity {
        station: ascii_field(data, IDENT_STATION_OFF),
        version: ascii_field(data, IDENT_VERSION_OFF),
        sequence: u32::from_le_bytes([
            data[IDENT_SEQUENCE_OFF],
            data[IDENT_SEQUENCE_OFF + 1],
            data[IDENT_SEQUENCE_OFF + 2],
            data[IDENT_SEQUENCE_OFF + 3],
        ]),
    })
}

/// Normalise a relay host string: strip URL scheme and path.
pub fn clean_host(host: &str) -> String {
    let mut h = host.trim();
    if let Some(rest) = h.strip_prefix("http://") {
        h = rest;
    }
    if let Some(rest) = h.strip_prefix("https://") {
        h = rest;
    }
    match h.split('/').next() {
        Some(first) => first.to_string(),
        None => h.to_string(),
    }
}

/// The window of 2·span+1 wires centred on `center`, clamped at wire 1.
pub fn wires_around(center: u32, span: u32) -> Vec<u32> {
    let start = center.saturating_sub(span).max(1);
    (start..start + 2 * span + 1).collect()
}

/// A candidate sequence is plausible iff every element is in range, it
/// starts with a mark, no two adjacent elements repeat, and at least one
/// element is positive.
fn plausible(seq: &[i32]) -> bool {
    if seq.len() < 2 || seq.len() > 32 {
        return false;
    }
    if seq[0] <= 0 {
        return false;
    }
    let mut prev = 0i32;
    let mut positives = 0usize;
    for &v in seq {
        let a = v.abs();
        if a < MIN_ELEMENT_MS || a > MAX_ELEMENT_MS {
            return false;
        }
        if v > 0 {
            positives += 1;
        }
        if v == prev {
            return false;
        }
        prev = v;
    }
    positives > 0
}

/// Prefer shorter total duration, stricter sign alternation, length near 6.
fn score(seq: &[i32]) -> f32 {
    let total: i64 = seq.iter().map(|v| v.abs() as i64).sum();
    let alternations = seq
        .windows(2)
        .filter(|w| (w[0] > 0) != (w[1] > 0))
        .count();
    alternations as f32 * 10.0 - total as f32 / 50.0 - (seq.len() as f32 - 6.0).abs()
}

/// Extract a mark/space timing sequence from a DATA payload.
///
/// The server's record layout is historically ambiguous, so this is a
/// ranked-score policy: scan offsets 2..20 at both 16-bit and 32-bit
/// strides, slide windows of 2..=16 decoded integers, keep the plausible
/// candidate with the best score. `None` means the datagram should be
/// treated as a bare packet arrival for fallback gating.
pub fn extract_timings(data: &[u8]) -> Option<Vec<i32>> {
    if data.len() < 8 {
        return None;
    }
    let cmd = u16::from_le_bytes([data[0], data[1]]);
    if cmd != CMD_DATA {
        return None;
    }

    let mut best: Option<(f32, Vec<i32>)> = None;
    let off_end = (data.len() - 4).min(20);

    for (step, wide) in [(2usize, false), (4usize, true)] {
        for off in (2..off_end).step_by(2) {
            let n = (data.len() - off) / step;
            if n == 0 {
                continue;
            }
            let arr: Vec<i32> = (0..n)
                .map(|i| {
                    let p = off + i * step;
                    if wide {
                        i32::from_le_bytes([data[p], data[p + 1], data[p + 2], data[p + 3]])
                    } else {
                        i16::from_le_bytes([data[p], data[p + 1]]) as i32
                    }
                })
                .collect();

            for i in 0..arr.len().saturating_sub(1) {
                for j in (i + 2)..=arr.len().min(i + 16) {
                    let seq = &arr[i..j];
                    if !plausible(seq) {
                        continue;
                    }
                    let s = score(seq);
                    if best.as_ref().map_or(true, |(b, _)| s > *b) {
                        best = Some((s, seq.to_vec()));
                    }
                }
            }
        }
    }

    best.map(|(_, seq)| seq)
}
