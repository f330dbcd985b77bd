//! CONNECT tunnel relay.
//!
//! A tunnel session moves through three states: `Establishing` while the
//! origin is dialed, `Relaying` once the client has been told
//! `200 Connection Established`, and `Closed` when both copy directions have
//! ended. The two directions run as separate tasks and the session waits for
//! both before the sockets are released.

use crate::error::{ProxyError, Result};
use crate::original_dst::OriginalDstProvider;
use crate::peek::PeekableStream;
use crate::request::{error_response, read_request_head};
use crate::resolver::HostResolver;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Sent to the client once the origin connection is up.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Lifecycle of one tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Establishing,
    Relaying,
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Establishing => f.write_str("establishing"),
            TunnelState::Relaying => f.write_str("relaying"),
            TunnelState::Closed => f.write_str("closed"),
        }
    }
}

/// Bytes moved in each direction of a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_server: u64,
    pub server_to_client: u64,
}

/// Where a tunnel's destination comes from.
#[derive(Clone, Copy)]
pub enum TunnelMode<'a> {
    /// The `host:port` named in the `CONNECT` request.
    Explicit,
    /// The kernel's record of what the client dialed before redirection.
    Transparent(&'a dyn OriginalDstProvider),
}

impl fmt::Debug for TunnelMode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelMode::Explicit => f.write_str("Explicit"),
            TunnelMode::Transparent(_) => f.write_str("Transparent"),
        }
    }
}

/// Establishes and runs one tunnel for a classified connection.
///
/// In explicit mode the `CONNECT` head is consumed and never forwarded. In
/// transparent mode nothing is parsed: the destination comes from the
/// provider before any byte is read, and the whole stream, peeked bytes
/// included, is relayed as is. A failed lookup closes the connection without
/// dialing or answering. A failed dial is answered with `503` and the success
/// banner is never sent.
pub async fn handle_tunnel(
    mut client: PeekableStream<TcpStream>,
    resolver: &HostResolver,
    mode: TunnelMode<'_>,
    connect_timeout: Option<Duration>,
) -> Result<RelayStats> {
    let (host, port) = match mode {
        TunnelMode::Transparent(provider) => {
            let addr = provider.original_dst(client.get_ref())?;
            debug!(original_dst = %addr, "Recovered original destination");
            (addr.ip().to_string(), addr.port())
        }
        TunnelMode::Explicit => connect_target(&mut client).await?,
    };

    let target = resolver.resolve(&host, port);
    debug!(state = %TunnelState::Establishing, target = %target, "Dialing tunnel target");

    let server = match target.connect(connect_timeout).await {
        Ok(server) => server,
        Err(e) => {
            reject(
                &mut client,
                503,
                "Service Unavailable",
                "Failed to connect to target\n",
            )
            .await;
            return Err(e);
        }
    };

    client.write_all(CONNECTION_ESTABLISHED).await?;
    info!(
        state = %TunnelState::Relaying,
        host = %host,
        target = %target,
        "Tunnel established"
    );

    let stats = relay(client, server).await;
    info!(
        state = %TunnelState::Closed,
        target = %target,
        client_to_server = stats.client_to_server,
        server_to_client = stats.server_to_client,
        "Tunnel closed"
    );
    Ok(stats)
}

/// Reads the `CONNECT` head and returns the host and port it names.
///
/// Anything that is not a usable `CONNECT` request is answered and closed.
async fn connect_target(client: &mut PeekableStream<TcpStream>) -> Result<(String, u16)> {
    let head = match read_request_head(client).await {
        Ok(head) => head,
        Err(e @ ProxyError::MalformedRequest { .. }) => {
            reject(client, 400, "Bad Request", "Malformed CONNECT request\n").await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if !head.is_connect() {
        reject(client, 405, "Method Not Allowed", "Only CONNECT is tunneled\n").await;
        return Err(ProxyError::malformed_request(format!(
            "unexpected method {}",
            head.method
        )));
    }

    match head.connect_target() {
        Ok(target) => Ok(target),
        Err(e) => {
            reject(client, 400, "Bad Request", "Invalid CONNECT target\n").await;
            Err(e)
        }
    }
}

/// Copies bytes both ways between `client` and `server` until both
/// directions are done.
///
/// Each direction runs in its own task and half-closes its destination on
/// end-of-stream, leaving the other direction running. An I/O error in
/// either direction ends the session: the other task is cancelled and
/// awaited before both streams are dropped.
pub async fn relay<C, S>(client: C, server: S) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut server_r, mut server_w) = tokio::io::split(server);

    let mut upstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut client_r, &mut server_w).await;
        let _ = server_w.shutdown().await;
        copied
    });
    let mut downstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut server_r, &mut client_w).await;
        let _ = client_w.shutdown().await;
        copied
    });

    let (up, down) = tokio::select! {
        first = &mut upstream => {
            let up = settle(first);
            let down = finish_other(up.is_err(), downstream).await;
            (up, down)
        }
        first = &mut downstream => {
            let down = settle(first);
            let up = finish_other(down.is_err(), upstream).await;
            (up, down)
        }
    };

    let mut stats = RelayStats::default();
    match up {
        Ok(n) => stats.client_to_server = n,
        Err(e) => debug!(error = %e, "client->server relay ended"),
    }
    match down {
        Ok(n) => stats.server_to_client = n,
        Err(e) => debug!(error = %e, "server->client relay ended"),
    }
    stats
}

async fn finish_other(abort: bool, other: JoinHandle<io::Result<u64>>) -> io::Result<u64> {
    if abort {
        other.abort();
    }
    settle(other.await)
}

fn settle(joined: std::result::Result<io::Result<u64>, JoinError>) -> io::Result<u64> {
    joined.unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)))
}

async fn reject(client: &mut PeekableStream<TcpStream>, status: u16, reason: &str, body: &str) {
    let resp = error_response(status, reason, body);
    if let Err(e) = client.write_all(resp.as_bytes()).await {
        warn!(error = %e, status = status, "Failed to write tunnel error response");
    }
    let _ = client.shutdown().await;
}
