//! HTTP/1.x request head parsing.
//!
//! Both handlers start by reading one request head from the client: the
//! forwarder to learn and rewrite the destination, the tunnel to learn the
//! `CONNECT` target. Heads are parsed with `httparse`; bytes read past the
//! blank line are pushed back into the [`PeekableStream`] so whatever follows
//! (a request body, early tunnel payload) is still delivered in order.

use crate::error::{ProxyError, Result};
use crate::peek::PeekableStream;
use crate::resolver::parse_host_port;
use http::Uri;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest request head accepted from a client.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of header fields in a request head.
pub const MAX_HEADERS: usize = 64;

const READ_CHUNK: usize = 4096;

/// Hop-by-hop headers that are not passed on to the origin.
const HOP_BY_HOP: [&str; 3] = ["connection", "proxy-connection", "keep-alive"];

/// A single header field as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

/// A parsed request line plus header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    /// HTTP minor version (0 or 1).
    pub version: u8,
    pub headers: Vec<Header>,
}

impl RequestHead {
    /// Parses a head from the start of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold a complete head, or the
    /// head together with the number of bytes it occupied.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let len = match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(ProxyError::malformed_request(e.to_string())),
        };

        let head = RequestHead {
            method: req.method.unwrap_or_default().to_string(),
            target: req.path.unwrap_or_default().to_string(),
            version: req.version.unwrap_or(1),
            headers: req
                .headers
                .iter()
                .map(|h| Header {
                    name: h.name.to_string(),
                    value: h.value.to_vec(),
                })
                .collect(),
        };

        Ok(Some((head, len)))
    }

    /// Returns the first header named `name` (case-insensitive) as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(&h.value).ok())
            .map(str::trim)
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Declared body length, if the request carries `Content-Length`.
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.header("content-length") {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ProxyError::malformed_request(format!("bad Content-Length: {value}"))),
        }
    }

    /// Whether the body uses chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|te| {
                te.rsplit(',')
                    .next()
                    .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false)
    }

    /// Host and port named by a `CONNECT` target (port defaults to 443).
    pub fn connect_target(&self) -> Result<(String, u16)> {
        if self.target.is_empty() {
            return Err(ProxyError::MissingHost);
        }
        Ok(parse_host_port(&self.target, 443))
    }

    /// The authority the client asked for: absolute-form target first, then
    /// the `Host` header.
    pub fn authority(&self) -> Option<String> {
        let from_target = self
            .target
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.authority().map(|a| strip_userinfo(a.as_str()).to_string()));

        from_target
            .or_else(|| self.header("host").map(str::to_string))
            .filter(|authority| !authority.is_empty())
    }

    /// Host and port to forward a plain HTTP request to.
    pub fn destination(&self) -> Result<(String, u16)> {
        let authority = self.authority().ok_or(ProxyError::MissingHost)?;
        let https = self
            .target
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.scheme_str().map(|s| s.eq_ignore_ascii_case("https")))
            .unwrap_or(false);
        let default_port = if https { 443 } else { 80 };
        Ok(parse_host_port(&authority, default_port))
    }

    /// The request target in origin-form (`/path?query`).
    pub fn origin_form(&self) -> String {
        if self.target.starts_with('/') || self.target == "*" {
            return self.target.clone();
        }
        match self.target.parse::<Uri>() {
            Ok(uri) => uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .filter(|pq| !pq.is_empty())
                .unwrap_or("/")
                .to_string(),
            Err(_) => self.target.clone(),
        }
    }

    /// Header names listed in every `Connection` field, as sent.
    fn connection_tokens(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("connection"))
            .filter_map(|h| std::str::from_utf8(&h.value).ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect()
    }

    /// Serializes the head for the origin server.
    ///
    /// The target becomes origin-form and `Host` is set to `host`. The fixed
    /// hop-by-hop headers and any header named in `Connection` are dropped,
    /// and `Connection: close` is added: exactly one request is sent per
    /// origin connection.
    pub fn encode_for_origin(&self, host: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(
            format!(
                "{} {} HTTP/1.{}\r\nHost: {}\r\n",
                self.method,
                self.origin_form(),
                self.version,
                host
            )
            .as_bytes(),
        );

        let listed = self.connection_tokens();
        for header in &self.headers {
            if header.name.eq_ignore_ascii_case("host")
                || HOP_BY_HOP
                    .iter()
                    .any(|hop| header.name.eq_ignore_ascii_case(hop))
                || listed
                    .iter()
                    .any(|token| header.name.eq_ignore_ascii_case(token))
            {
                continue;
            }
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(&header.value);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"Connection: close\r\n\r\n");
        out
    }
}

/// Builds a minimal HTTP/1.1 error response with a short plain-text body.
pub fn error_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {body}",
        body.len()
    )
}

fn strip_userinfo(authority: &str) -> &str {
    authority.rsplit('@').next().unwrap_or(authority)
}

/// Reads one request head from `stream`.
///
/// Any bytes received after the head are returned to the stream. EOF before
/// the first byte surfaces as an I/O error; EOF mid-head or an oversized head
/// as a malformed request.
pub async fn read_request_head<S>(stream: &mut PeekableStream<S>) -> Result<RequestHead>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before request",
                )
                .into());
            }
            return Err(ProxyError::malformed_request("connection closed mid-head"));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((head, len)) = RequestHead::parse(&buf)? {
            stream.unread(&buf[len..]);
            return Ok(head);
        }

        if buf.len() > MAX_HEAD_SIZE {
            return Err(ProxyError::malformed_request("request head too large"));
        }
    }
}
