//! Outbound trait definitions
//!
//! The NAT handler dials real destinations through a platform-provided
//! [`Dialer`]. A dialed connection is an opaque full-duplex byte stream that
//! closes when dropped.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::Endpoint;

/// A full-duplex byte stream to a dialed destination
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

impl fmt::Debug for dyn ProxyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProxyStream")
    }
}

/// Boxed dialed connection
pub type BoxedStream = Box<dyn ProxyStream>;

/// Opens connections to real destinations
///
/// Implementations are provided by the platform; [`DirectDialer`] connects
/// straight to the destination.
///
/// [`DirectDialer`]: super::DirectDialer
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection to `dest`
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the connection cannot be established; the
    /// caller retries with backoff.
    async fn dial(&self, dest: &Endpoint) -> io::Result<BoxedStream>;
}
