//! Wire codec for the three MIDI over LAN packet variants.
//!
//! All three share a 6-octet prefix: the ASCII mark `"MIDI"`, a version byte
//! (currently always `1`), and a packet-type byte. Everything after that is
//! variant-specific.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::{MAX_STRING_LEN, PROTOCOL_VERSION};

const HEADER_MARK: &[u8; 4] = b"MIDI";
const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Midi = 0,
    Hello = 1,
    HelloReply = 2,
}

impl PacketType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Midi),
            1 => Some(Self::Hello),
            2 => Some(Self::HelloReply),
            _ => None,
        }
    }
}

/// Cause recorded alongside a dropped packet, for logging only -- it never
/// changes how the caller reacts. Every `InvalidPacket` is handled the same
/// way: log and drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPacketCause {
    BadVersion(u8),
    BadType(u8),
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPacket(pub InvalidPacketCause);

impl fmt::Display for InvalidPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            InvalidPacketCause::BadVersion(v) => write!(f, "unsupported protocol version {v}"),
            InvalidPacketCause::BadType(t) => write!(f, "unknown packet type {t}"),
            InvalidPacketCause::Truncated => write!(f, "packet truncated"),
        }
    }
}

impl std::error::Error for InvalidPacket {}

/// A decoded MIDI over LAN packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Midi(MidiMessage),
    Hello(Hello),
    HelloReply(HelloReply),
}

/// Carries one MIDI message from a device_name-tagged source port. Any
/// buffer that doesn't start with the protocol mark decodes as one of these
/// with `device_name == "unknown"`, so that legacy raw-MIDI senders degrade
/// gracefully instead of being rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiMessage {
    pub device_name: String,
    pub midi_data: Vec<u8>,
}

impl MidiMessage {
    pub fn encode(&self) -> Vec<u8> {
        encode_midi(&self.device_name, &self.midi_data)
    }
}

/// Discovery beacon. `id` is assigned from a process-wide monotonic counter
/// at construction time, not chosen by the caller -- see [`Hello::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub id: u32,
    pub hostname: String,
    pub device_names: Vec<String>,
}

static HELLO_COUNTER: AtomicU32 = AtomicU32::new(0);

impl Hello {
    /// Build a new Hello, pulling the next id off the process-global
    /// counter. Wraps silently after ~4 billion beacons; harmless over any
    /// real session.
    pub fn new(hostname: impl Into<String>, device_names: Vec<String>) -> Self {
        Self {
            id: HELLO_COUNTER.fetch_add(1, Ordering::Relaxed),
            hostname: hostname.into(),
            device_names,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_hello(self.id, &self.hostname, &self.device_names)
    }
}

/// Reply to a Hello. Multicast like everything else, so it carries the
/// originating host's address; only that host should act on it.
///
/// `id` and `remote_ip` are mandatory constructor arguments rather than
/// optional fields validated at encode time -- an unset id or address can't
/// be represented at all, which folds what would otherwise be a runtime
/// "unset field" error into the type system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloReply {
    pub id: u32,
    pub remote_ip: Ipv4Addr,
    pub hostname: String,
    pub device_names: Vec<String>,
}

impl HelloReply {
    pub fn new(
        id: u32,
        remote_ip: Ipv4Addr,
        hostname: impl Into<String>,
        device_names: Vec<String>,
    ) -> Self {
        Self {
            id,
            remote_ip,
            hostname: hostname.into(),
            device_names,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_hello_reply(self.id, self.remote_ip, &self.hostname, &self.device_names)
    }
}

/// Truncate `s` to `max_len` octets of UTF-8, trimming back to the last
/// complete code point boundary so the result is never ill-formed.
fn truncate_utf8(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn write_pascal_string(buf: &mut Vec<u8>, s: &str) {
    let truncated = truncate_utf8(s, MAX_STRING_LEN);
    buf.push(truncated.len() as u8);
    buf.extend_from_slice(truncated.as_bytes());
}

fn read(data: &[u8], pos: &mut usize, len: usize) -> Result<&[u8], InvalidPacket> {
    if *pos + len > data.len() {
        return Err(InvalidPacket(InvalidPacketCause::Truncated));
    }
    let slice = &data[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

/// Decode a length-prefixed UTF-8 string. Ill-formed bytes are lossily
/// replaced rather than rejected; running past the end of the buffer is the
/// only failure mode.
fn read_pascal_string(data: &[u8], pos: &mut usize) -> Result<String, InvalidPacket> {
    let len = read(data, pos, 1)?[0] as usize;
    let bytes = read(data, pos, len)?;
    Ok(String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string())
}

fn read_string_list(data: &[u8], pos: &mut usize) -> Result<Vec<String>, InvalidPacket> {
    let count = read(data, pos, 1)?[0] as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(read_pascal_string(data, pos)?);
    }
    Ok(names)
}

/// Encode a MIDI Message packet (type 0).
pub fn encode_midi(device_name: &str, midi_data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 1 + MAX_STRING_LEN + midi_data.len());
    buf.extend_from_slice(HEADER_MARK);
    buf.push(PROTOCOL_VERSION);
    buf.push(PacketType::Midi as u8);
    write_pascal_string(&mut buf, device_name);
    buf.extend_from_slice(midi_data);
    buf
}

/// Encode a Hello packet (type 1) from an already-assigned id. Prefer
/// [`Hello::new`] together with [`Hello::encode`] unless you specifically
/// need to re-encode an id assigned elsewhere (tests, replays).
pub fn encode_hello(id: u32, hostname: &str, device_names: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 4 + 1 + MAX_STRING_LEN + 8);
    buf.extend_from_slice(HEADER_MARK);
    buf.push(PROTOCOL_VERSION);
    buf.push(PacketType::Hello as u8);
    buf.extend_from_slice(&id.to_be_bytes());
    write_pascal_string(&mut buf, hostname);
    buf.push(device_names.len() as u8);
    for name in device_names {
        write_pascal_string(&mut buf, name);
    }
    buf
}

/// Encode a Hello Reply packet (type 2).
pub fn encode_hello_reply(
    id: u32,
    remote_ip: Ipv4Addr,
    hostname: &str,
    device_names: &[String],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 4 + 4 + 1 + MAX_STRING_LEN + 8);
    buf.extend_from_slice(HEADER_MARK);
    buf.push(PROTOCOL_VERSION);
    buf.push(PacketType::HelloReply as u8);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&remote_ip.octets());
    write_pascal_string(&mut buf, hostname);
    buf.push(device_names.len() as u8);
    for name in device_names {
        write_pascal_string(&mut buf, name);
    }
    buf
}

/// Decode a buffer received off the wire.
///
/// Anything shorter than 6 bytes, or not starting with the protocol mark, is
/// treated as raw legacy MIDI data rather than an error -- the fallback path
/// for senders that don't speak this protocol at all.
pub fn decode(data: &[u8]) -> Result<Packet, InvalidPacket> {
    if data.len() < HEADER_LEN || &data[0..4] != HEADER_MARK {
        return Ok(Packet::Midi(MidiMessage {
            device_name: "unknown".to_string(),
            midi_data: data.to_vec(),
        }));
    }

    let version = data[4];
    if version != PROTOCOL_VERSION {
        return Err(InvalidPacket(InvalidPacketCause::BadVersion(version)));
    }

    let packet_type =
        PacketType::from_u8(data[5]).ok_or(InvalidPacket(InvalidPacketCause::BadType(data[5])))?;

    let mut pos = HEADER_LEN;
    match packet_type {
        PacketType::Midi => {
            let name_len = read(data, &mut pos, 1)?[0] as usize;
            let name_bytes = read(data, &mut pos, name_len)?;
            let device_name = String::from_utf8_lossy(name_bytes)
                .trim_end_matches('\0')
                .to_string();
            let midi_data = data[pos..].to_vec();
            Ok(Packet::Midi(MidiMessage {
                device_name,
                midi_data,
            }))
        }
        PacketType::Hello => {
            let id = u32::from_be_bytes(read(data, &mut pos, 4)?.try_into().unwrap());
            let hostname = read_pascal_string(data, &mut pos)?;
            let device_names = read_string_list(data, &mut pos)?;
            Ok(Packet::Hello(Hello {
                id,
                hostname,
                device_names,
            }))
        }
        PacketType::HelloReply => {
            let id = u32::from_be_bytes(read(data, &mut pos, 4)?.try_into().unwrap());
            let ip_bytes = read(data, &mut pos, 4)?;
            let remote_ip = Ipv4Addr::new(ip_bytes[0], ip_bytes[1], ip_bytes[2], ip_bytes[3]);
            let hostname = read_pascal_string(data, &mut pos)?;
            let device_names = read_string_list(data, &mut pos)?;
            Ok(Packet::HelloReply(HelloReply {
                id,
                remote_ip,
                hostname,
                device_names,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_message_roundtrip() {
        let data = encode_midi("port-1", &[0x90, 0x3C, 0x40]);
        match decode(&data).unwrap() {
            Packet::Midi(m) => {
                assert_eq!(m.device_name, "port-1");
                assert_eq!(m.midi_data, vec![0x90, 0x3C, 0x40]);
            }
            other => panic!("expected MidiMessage, got {other:?}"),
        }
    }

    #[test]
    fn midi_message_wire_layout_matches_spec() {
        let data = encode_midi("port", &[0x90, 0x3C, 0x40]);
        let mut expected = b"MIDI\x01\x00".to_vec();
        expected.push(4);
        expected.extend_from_slice(b"port");
        expected.extend_from_slice(&[0x90, 0x3C, 0x40]);
        assert_eq!(data, expected);
    }

    #[test]
    fn hello_roundtrip_preserves_fields() {
        let hello = Hello::new("alpha", vec!["kbd".to_string(), "pads".to_string()]);
        let data = hello.encode();
        match decode(&data).unwrap() {
            Packet::Hello(h) => {
                assert_eq!(h.id, hello.id);
                assert_eq!(h.hostname, "alpha");
                assert_eq!(h.device_names, vec!["kbd".to_string(), "pads".to_string()]);
            }
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn hello_reply_roundtrip_preserves_fields() {
        let reply = HelloReply::new(
            7,
            Ipv4Addr::new(192, 168, 1, 42),
            "beta",
            vec!["synth".to_string()],
        );
        let data = reply.encode();
        match decode(&data).unwrap() {
            Packet::HelloReply(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.remote_ip, Ipv4Addr::new(192, 168, 1, 42));
                assert_eq!(r.hostname, "beta");
                assert_eq!(r.device_names, vec!["synth".to_string()]);
            }
            other => panic!("expected HelloReply, got {other:?}"),
        }
    }

    #[test]
    fn framing_resilience_short_buffer_becomes_raw_midi() {
        let buf = [0x90u8, 0x3C];
        match decode(&buf).unwrap() {
            Packet::Midi(m) => {
                assert_eq!(m.device_name, "unknown");
                assert_eq!(m.midi_data, vec![0x90, 0x3C]);
            }
            other => panic!("expected MidiMessage, got {other:?}"),
        }
    }

    #[test]
    fn framing_resilience_non_midi_header_becomes_raw_midi() {
        let buf = b"XYZ123456789";
        match decode(buf).unwrap() {
            Packet::Midi(m) => {
                assert_eq!(m.device_name, "unknown");
                assert_eq!(m.midi_data, buf.to_vec());
            }
            other => panic!("expected MidiMessage, got {other:?}"),
        }
    }

    #[test]
    fn long_device_name_truncates_to_64_octets() {
        let long_name: String = "a".repeat(100);
        let data = encode_midi(&long_name, &[0x90]);
        match decode(&data).unwrap() {
            Packet::Midi(m) => {
                assert_eq!(m.device_name.len(), 64);
                assert!(m.device_name.chars().all(|c| c == 'a'));
            }
            other => panic!("expected MidiMessage, got {other:?}"),
        }
    }

    #[test]
    fn long_device_name_truncation_never_splits_a_code_point() {
        // 'e' + combining acute (2 bytes each when normalized as separate
        // scalars isn't the point here -- 'é' as a single NFC scalar is 2
        // bytes, so 40 repeats is 80 bytes and lands astride the 64 cutoff.
        let long_name: String = "é".repeat(40);
        let data = encode_midi(&long_name, &[0x90]);
        match decode(&data).unwrap() {
            Packet::Midi(m) => {
                assert!(m.device_name.len() <= 64);
                assert!(String::from_utf8(m.device_name.into_bytes()).is_ok());
            }
            other => panic!("expected MidiMessage, got {other:?}"),
        }
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut data = b"MIDI".to_vec();
        data.push(9);
        data.push(0);
        data.extend_from_slice(&[0, 0x90]);
        let err = decode(&data).unwrap_err();
        assert_eq!(err.0, InvalidPacketCause::BadVersion(9));
    }

    #[test]
    fn bad_type_is_rejected() {
        let mut data = b"MIDI".to_vec();
        data.push(PROTOCOL_VERSION);
        data.push(200);
        let err = decode(&data).unwrap_err();
        assert_eq!(err.0, InvalidPacketCause::BadType(200));
    }

    #[test]
    fn hello_id_is_monotonically_increasing() {
        let a = Hello::new("h", vec![]);
        let b = Hello::new("h", vec![]);
        let c = Hello::new("h", vec![]);
        assert!(b.id > a.id);
        assert!(c.id > b.id);
    }

    #[test]
    fn low_level_encode_hello_uses_given_id() {
        let data = encode_hello(123, "host", &["dev".to_string()]);
        match decode(&data).unwrap() {
            Packet::Hello(h) => assert_eq!(h.id, 123),
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn truncated_hello_is_rejected() {
        let mut data = b"MIDI".to_vec();
        data.push(PROTOCOL_VERSION);
        data.push(PacketType::Hello as u8);
        data.extend_from_slice(&7u32.to_be_bytes());
        let err = decode(&data).unwrap_err();
        assert_eq!(err.0, InvalidPacketCause::Truncated);
    }
}
