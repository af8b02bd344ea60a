use anyhow::Context;
use socket2::Protocol;
use std::net::SocketAddr;

pub(crate) fn bind_udp_ops(addr: SocketAddr, only_v6: bool) -> anyhow::Result<socket2::Socket> {
    let socket = if addr.is_ipv4() {
        socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?
    } else {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV6,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket
            .set_only_v6(only_v6)
            .with_context(|| format!("set_only_v6 failed: {}", &addr))?;
        socket
    };
    if addr.port() != 0 {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Bind a non-blocking UDP socket, ready to be handed to tokio.
pub fn bind_udp(addr: SocketAddr) -> anyhow::Result<tokio::net::UdpSocket> {
    let socket = bind_udp_ops(addr, true).with_context(|| format!("bind_udp {}", addr))?;
    let socket = tokio::net::UdpSocket::from_std(socket.into())
        .with_context(|| format!("register udp socket {}", addr))?;
    Ok(socket)
}
