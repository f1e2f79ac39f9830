//! Bidirectional copy between a flow's upstream halves and a remote stream
//!
//! The upstream side of a flow arrives as separate reader and writer halves;
//! the remote side is one full-duplex stream. Both directions are driven by
//! a single future so a flow occupies one task per direction only at the
//! call site, not here.
//!
//! On clean end-of-stream in one direction the corresponding writer is
//! flushed and shut down, signalling EOF to the peer. The first I/O error in
//! either direction fails the whole copy; the caller closes both sides.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::DEFAULT_BUFFER_SIZE;

/// Result of a completed bidirectional copy
#[derive(Debug, Clone, Copy)]
pub struct PipeResult {
    /// Bytes transferred from the upstream reader to the remote peer
    pub upstream_to_remote: u64,
    /// Bytes transferred from the remote peer to the upstream writer
    pub remote_to_upstream: u64,
}

impl PipeResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.upstream_to_remote + self.remote_to_upstream
    }
}

/// State for one direction of transfer
struct TransferState {
    buf: Box<[u8]>,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
}

impl TransferState {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
        }
    }

    fn poll_transfer<R, W, F>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
        on_activity: &mut F,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnMut(u64),
    {
        loop {
            if self.pos < self.cap {
                // Drain buffered data into the writer
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes_transferred += n as u64;
                on_activity(n as u64);

                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                // EOF reached: flush and shut the writer down once
                if !self.write_done {
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => self.write_done = true,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

/// Bidirectional pipe future
struct BidirectionalPipe<'a, R, W, S, F> {
    upstream_read: &'a mut R,
    upstream_write: &'a mut W,
    remote: &'a mut S,
    up: TransferState,
    down: TransferState,
    on_activity: F,
}

impl<R, W, S, F> std::future::Future for BidirectionalPipe<'_, R, W, S, F>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(u64) + Unpin,
{
    type Output = io::Result<PipeResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        let up_done = match this.up.poll_transfer(
            cx,
            Pin::new(&mut this.upstream_read),
            Pin::new(&mut this.remote),
            &mut this.on_activity,
        ) {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => false,
        };

        let down_done = match this.down.poll_transfer(
            cx,
            Pin::new(&mut this.remote),
            Pin::new(&mut this.upstream_write),
            &mut this.on_activity,
        ) {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => false,
        };

        if up_done && down_done {
            Poll::Ready(Ok(PipeResult {
                upstream_to_remote: this.up.bytes_transferred,
                remote_to_upstream: this.down.bytes_transferred,
            }))
        } else {
            Poll::Pending
        }
    }
}

/// Copy bytes between the upstream halves and the remote stream until both
/// directions reach EOF
///
/// `on_activity` is invoked with the chunk size every time bytes move in
/// either direction.
///
/// # Errors
///
/// Returns the first I/O error from either direction; remaining transfer
/// state is abandoned and the caller is expected to close both sides.
pub async fn pipe_bidirectional<R, W, S, F>(
    upstream_read: &mut R,
    upstream_write: &mut W,
    remote: &mut S,
    on_activity: F,
) -> io::Result<PipeResult>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(u64) + Unpin,
{
    BidirectionalPipe {
        upstream_read,
        upstream_write,
        remote,
        up: TransferState::new(DEFAULT_BUFFER_SIZE),
        down: TransferState::new(DEFAULT_BUFFER_SIZE),
        on_activity,
    }
    .await
}
