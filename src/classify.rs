//! First-byte stream classification.
//!
//! A `C` opens a `CONNECT` request and selects the tunnel path; anything else
//! is handed to the plain HTTP forwarder. The discriminating byte stays in the
//! returned stream.

use crate::peek::PeekableStream;
use std::fmt;
use std::io;
use tokio::io::AsyncRead;

/// Which handler owns a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `CONNECT` request, relayed as an opaque tunnel.
    Tunnel,
    /// Any other request, forwarded as a single HTTP exchange.
    Http,
}

impl StreamKind {
    pub fn from_first_byte(byte: u8) -> Self {
        match byte {
            b'C' => StreamKind::Tunnel,
            _ => StreamKind::Http,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Tunnel => f.write_str("tunnel"),
            StreamKind::Http => f.write_str("http"),
        }
    }
}

/// Peeks one byte from `stream` and classifies it.
///
/// The returned stream yields the peeked byte first, as if nothing had been
/// read. Read errors, including EOF before the first byte, are returned.
pub async fn classify<S>(stream: S) -> io::Result<(StreamKind, PeekableStream<S>)>
where
    S: AsyncRead + Unpin,
{
    let mut stream = PeekableStream::new(stream);
    let first = stream.peek_byte().await?;
    Ok((StreamKind::from_first_byte(first), stream))
}
