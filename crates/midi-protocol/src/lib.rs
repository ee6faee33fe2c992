pub mod packets;

/// Protocol version understood by this implementation. A packet whose
/// version field doesn't match is rejected rather than guessed at --- older,
/// incompatible layouts (no hostname field, etc.) are not supported.
pub const PROTOCOL_VERSION: u8 = 1;

/// MIDI over LAN multicast group.
pub const MULTICAST_GROUP: &str = "239.0.3.250";

/// MIDI over LAN multicast port.
pub const MULTICAST_PORT: u16 = 56129;

/// Maximum length, in octets, of any length-prefixed string on the wire
/// (device name, hostname).
pub const MAX_STRING_LEN: usize = 64;

/// Recommended packet size to stay clear of Ethernet fragmentation.
pub const RECOMMENDED_MTU: usize = 1500;

/// Hard UDP payload ceiling.
pub const MAX_UDP_PAYLOAD: usize = 65507;
