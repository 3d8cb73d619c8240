//! Socket utilities and tuning

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Control traffic is tiny; small buffers keep stale commands from piling up
/// in the kernel while the link stalls.
pub const SEND_BUFFER_SIZE: usize = 16 * 1024;
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Create a TCP socket tuned for low-latency control traffic.
///
/// No OS keepalive is enabled: liveness on the stream transport is inferred
/// from read and write failures only.
pub fn create_control_socket(addr: SocketAddr) -> std::io::Result<tokio::net::TcpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;
    socket.set_recv_buffer_size(RECV_BUFFER_SIZE)?;

    // Disable Nagle: every command should leave immediately
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;

    let std_stream: std::net::TcpStream = socket.into();
    Ok(tokio::net::TcpSocket::from_std_stream(std_stream))
}
