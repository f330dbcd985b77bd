//! Single-shot HTTP forwarding.
//!
//! Reads one request from the client, dials the (possibly overridden) origin,
//! sends the request with its original `Host`, and streams the response back
//! byte for byte until the origin closes. Neither side is reused for a second
//! request.

use crate::error::{ProxyError, Result};
use crate::peek::PeekableStream;
use crate::request::{error_response, read_request_head, RequestHead};
use crate::resolver::HostResolver;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// How much of the client stream belongs to the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestBody {
    Empty,
    Length(u64),
    /// Chunked or otherwise unframed: relay until the client stops sending.
    UntilClose,
}

impl RequestBody {
    fn of(head: &RequestHead) -> Result<Self> {
        if head.is_chunked() {
            return Ok(RequestBody::UntilClose);
        }
        Ok(match head.content_length()? {
            Some(0) | None => RequestBody::Empty,
            Some(len) => RequestBody::Length(len),
        })
    }
}

/// Forwards one HTTP request from `client` and returns the response size.
///
/// Parse failures are answered with `400`, dial failures with `502`; the
/// error is returned either way so the caller can log it.
pub async fn forward_http<S>(
    mut client: PeekableStream<S>,
    resolver: &HostResolver,
    connect_timeout: Option<Duration>,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = match read_request_head(&mut client).await {
        Ok(head) => head,
        Err(e @ ProxyError::MalformedRequest { .. }) => {
            reply(&mut client, 400, "Bad Request", "Malformed request\n").await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let prepared = head.destination().and_then(|(host, port)| {
        let body = RequestBody::of(&head)?;
        Ok((host, port, body))
    });
    let (host, port, body) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            reply(&mut client, 400, "Bad Request", "Invalid request target\n").await;
            return Err(e);
        }
    };

    let target = resolver.resolve(&host, port);
    info!(
        method = %head.method,
        host = %host,
        target = %target,
        "Forwarding HTTP request"
    );

    let mut origin = match target.connect(connect_timeout).await {
        Ok(origin) => origin,
        Err(e) => {
            reply(&mut client, 502, "Bad Gateway", "Failed to connect to target\n").await;
            return Err(e);
        }
    };

    let host_header = head.authority().unwrap_or(host);
    origin.write_all(&head.encode_for_origin(&host_header)).await?;

    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut origin_r, mut origin_w) = origin.split();

    let response = {
        let upload = async {
            match body {
                RequestBody::Empty => Ok(0),
                RequestBody::Length(len) => {
                    tokio::io::copy(&mut (&mut client_r).take(len), &mut origin_w).await
                }
                RequestBody::UntilClose => tokio::io::copy(&mut client_r, &mut origin_w).await,
            }
        };
        let download = tokio::io::copy(&mut origin_r, &mut client_w);
        tokio::pin!(upload);
        tokio::pin!(download);

        // The exchange is over once the response is; an unfinished upload is
        // abandoned with it.
        tokio::select! {
            res = &mut download => res,
            res = &mut upload => {
                match res {
                    Ok(sent) => debug!(bytes = sent, "Request body forwarded"),
                    Err(e) => warn!(error = %e, "Failed to forward request body"),
                }
                (&mut download).await
            }
        }
    }?;

    let _ = client_w.shutdown().await;
    debug!(bytes = response, "Response relayed");
    Ok(response)
}

async fn reply<W: AsyncWrite + Unpin>(client: &mut W, status: u16, reason: &str, body: &str) {
    let resp = error_response(status, reason, body);
    if let Err(e) = client.write_all(resp.as_bytes()).await {
        debug!(error = %e, status = status, "Failed to write error response");
    }
    let _ = client.shutdown().await;
}
