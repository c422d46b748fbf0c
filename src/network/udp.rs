//! UDP transport.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::Datagram;

/// Socket buffer size requested from the OS. Best effort.
const SOCKET_BUFFER: usize = 1 << 20;

/// Binds a non-blocking UDP socket on `addr` for the tokio runtime.
///
/// Address reuse is enabled so a restarted car can take its port back at once.
pub fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER);
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER);
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

impl Datagram for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bound_sockets_exchange_datagrams() {
        let a = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b_addr = b.local_addr().unwrap();

        Datagram::send_to(&a, b"hei", b_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = Datagram::recv_from(&b, &mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hei");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
