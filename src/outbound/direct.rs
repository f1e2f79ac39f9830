//! Direct dialer
//!
//! Connects straight to the destination: TCP via `TcpStream`, UDP via a
//! connected socket exposed as a byte stream. Both honor a connect timeout.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use super::traits::{BoxedStream, Dialer};
use crate::endpoint::{Address, Endpoint, Network};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dialer that connects directly to the destination
#[derive(Debug, Clone)]
pub struct DirectDialer {
    connect_timeout: Duration,
}

impl DirectDialer {
    /// Create a direct dialer with the default connect timeout
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a direct dialer with a custom connect timeout
    #[must_use]
    pub const fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn dial_tcp(&self, dest: &Endpoint) -> io::Result<TcpStream> {
        let connect = async {
            match &dest.address {
                Address::Ip(ip) => TcpStream::connect((*ip, dest.port)).await,
                Address::Domain(domain) => {
                    TcpStream::connect((domain.as_str(), dest.port)).await
                }
            }
        };
        let stream = timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {dest} timed out"),
                )
            })??;
        // Lower latency for interactive flows
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    async fn dial_udp(&self, dest: &Endpoint) -> io::Result<UdpSocket> {
        let bind_addr: SocketAddr = match dest.address {
            Address::Ip(IpAddr::V6(_)) => "[::]:0".parse().unwrap(),
            _ => "0.0.0.0:0".parse().unwrap(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        let connect = async {
            match &dest.address {
                Address::Ip(ip) => socket.connect((*ip, dest.port)).await,
                Address::Domain(domain) => socket.connect((domain.as_str(), dest.port)).await,
            }
        };
        timeout(self.connect_timeout, connect).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {dest} timed out"),
            )
        })??;
        Ok(socket)
    }
}

impl Default for DirectDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, dest: &Endpoint) -> io::Result<BoxedStream> {
        match dest.network {
            Network::Tcp => {
                let stream = self.dial_tcp(dest).await?;
                debug!(%dest, "Direct TCP connection established");
                Ok(Box::new(stream))
            }
            Network::Udp => {
                let socket = self.dial_udp(dest).await?;
                debug!(%dest, "Direct UDP association established");
                Ok(Box::new(UdpStream::new(socket)))
            }
        }
    }
}

/// A connected UDP socket exposed as a byte stream
///
/// Each write sends one datagram; each read yields one. Shutdown is a no-op
/// because UDP has no end-of-stream signal; dropping the stream releases the
/// socket.
#[derive(Debug)]
pub struct UdpStream {
    socket: UdpSocket,
}

impl UdpStream {
    /// Wrap a connected UDP socket
    #[must_use]
    pub const fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = DirectDialer::new();
        let dest = Endpoint::tcp(addr.ip(), addr.port());

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let mut conn = dialer.dial(&dest).await.unwrap();
        let (mut server, _) = accept.await.unwrap();

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_dial_tcp_refused() {
        // Port 1 on loopback is almost certainly closed.
        let dialer = DirectDialer::with_timeout(Duration::from_millis(500));
        let dest = Endpoint::tcp("127.0.0.1".parse().unwrap(), 1);
        assert!(dialer.dial(&dest).await.is_err());
    }

    #[tokio::test]
    async fn test_dial_udp_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let dialer = DirectDialer::new();
        let dest = Endpoint::udp(addr.ip(), addr.port());
        let mut conn = dialer.dial(&dest).await.unwrap();

        conn.write_all(b"query").await.unwrap();
        let mut buf = [0u8; 64];
        let (n, client) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"query");

        server.send_to(b"reply", client).await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"reply");
    }
}
