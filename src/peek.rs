//! Peek-then-replay stream wrapper.
//!
//! [`PeekableStream`] lets a caller look at bytes from the front of a stream
//! and hand them back, so the next consumer reads exactly the byte sequence
//! the peer sent. Pending bytes are drained before the inner stream is polled
//! again; every byte is delivered once, in order.

use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// A stream with a replay buffer in front of it.
#[derive(Debug)]
pub struct PeekableStream<S> {
    inner: S,
    pending: BytesMut,
}

impl<S> PeekableStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
        }
    }

    /// Pushes bytes back so they are returned before anything already pending.
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut replay = BytesMut::with_capacity(bytes.len() + self.pending.len());
        replay.extend_from_slice(bytes);
        replay.extend_from_slice(&self.pending);
        self.pending = replay;
    }

    /// Bytes buffered but not yet delivered to a reader.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> PeekableStream<S> {
    /// Returns the next byte without consuming it.
    ///
    /// End of stream before any byte arrives is reported as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub async fn peek_byte(&mut self) -> io::Result<u8> {
        if let Some(&byte) = self.pending.first() {
            return Ok(byte);
        }

        let mut buf = [0u8; 1];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before first byte",
            ));
        }
        self.pending.extend_from_slice(&buf[..n]);
        Ok(buf[0])
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Zero-capacity reads bypass the replay buffer.
        if !self.pending.is_empty() && buf.remaining() > 0 {
            let n = self.pending.len().min(buf.remaining());
            buf.put_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
