//! Multicast socket construction. One socket per worker, built and torn down
//! together -- there is no partial reconfiguration, only rebuild.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use midi_protocol::{MULTICAST_GROUP, MULTICAST_PORT};

pub fn multicast_group() -> Ipv4Addr {
    MULTICAST_GROUP.parse().expect("multicast group constant is a valid IPv4 literal")
}

pub fn multicast_dest() -> SocketAddrV4 {
    SocketAddrV4::new(multicast_group(), MULTICAST_PORT)
}

/// Build the sender's socket. Not bound to the multicast port -- sends go to
/// an ephemeral local port, as is conventional for a multicast publisher.
///
/// `interface` selects the outgoing interface for multicast traffic; an
/// interface that can't be set falls back to `127.0.0.0` and is logged by
/// the caller.
pub fn build_sender_socket(interface: Option<Ipv4Addr>, enable_loopback: bool) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("creating sender socket")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;

    socket
        .set_multicast_loop_v4(enable_loopback)
        .context("IP_MULTICAST_LOOP")?;

    let bind_iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    if let Err(e) = socket.set_multicast_if_v4(&bind_iface) {
        tracing::warn!(
            requested = %bind_iface,
            error = %e,
            "sender: could not set multicast interface, falling back to 127.0.0.0"
        );
        socket
            .set_multicast_if_v4(&Ipv4Addr::new(127, 0, 0, 0))
            .context("IP_MULTICAST_IF fallback")?;
    }

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&bind_addr.into()).context("binding sender socket")?;
    socket.set_nonblocking(true).context("setting sender socket nonblocking")?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("adopting sender socket into tokio runtime")
}

/// Build the receiver's socket: bound to the multicast port and joined to
/// the group, either on all interfaces or on a specific one.
pub fn build_receiver_socket(interface: Option<Ipv4Addr>) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("creating receiver socket")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;

    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    socket.set_reuse_port(true).context("SO_REUSEPORT")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT);
    socket.bind(&bind_addr.into()).context("binding receiver socket")?;

    let join_iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    socket
        .join_multicast_v4(&multicast_group(), &join_iface)
        .context("joining multicast group")?;

    socket.set_nonblocking(true).context("setting receiver socket nonblocking")?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("adopting receiver socket into tokio runtime")
}
