//! Destination resolution for the proxy.
//!
//! Overlays the hosts override table onto a requested destination: a
//! hostname present in the table is replaced by its IP, anything else passes
//! through untouched. Ports are never rewritten.

use crate::error::{ProxyError, Result};
use crate::hosts::HostsTable;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// A (host, port) pair to dial, computed fresh for every forwarding operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Host to connect to: the override IP, or the original hostname.
    pub host: String,

    /// Port to connect to, always the requested one.
    pub port: u16,

    /// Whether `host` came from the override table.
    pub overridden: bool,
}

impl ResolvedTarget {
    /// Opens a TCP connection to the target, optionally bounded by a timeout.
    pub async fn connect(&self, timeout: Option<Duration>) -> Result<TcpStream> {
        let dial = TcpStream::connect((self.host.as_str(), self.port));
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, dial).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                )),
            },
            None => dial.await,
        };

        result.map_err(|source| ProxyError::Dial {
            target: self.to_string(),
            source,
        })
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Resolver over the shared, read-only hosts table.
#[derive(Debug, Clone, Default)]
pub struct HostResolver {
    hosts: Arc<HostsTable>,
}

impl HostResolver {
    /// Creates a new HostResolver.
    pub fn new(hosts: Arc<HostsTable>) -> Self {
        Self { hosts }
    }

    /// Resolves `hostname` against the override table.
    ///
    /// Unmatched hostnames are the normal case and are returned unchanged.
    pub fn resolve(&self, hostname: &str, port: u16) -> ResolvedTarget {
        match self.hosts.get(hostname) {
            Some(ip) => {
                info!(host = %hostname, ip = %ip, port = port, "Resolved via hosts override");
                ResolvedTarget {
                    host: ip.to_string(),
                    port,
                    overridden: true,
                }
            }
            None => {
                debug!(host = %hostname, port = port, "No override, using original host");
                ResolvedTarget {
                    host: hostname.to_string(),
                    port,
                    overridden: false,
                }
            }
        }
    }

    /// The table this resolver reads from.
    pub fn hosts(&self) -> &HostsTable {
        &self.hosts
    }
}

/// Parses a host:port string, using default port if not specified.
///
/// IPv6 literals may be bracketed; brackets are stripped from the returned
/// host so it can be looked up and dialed directly.
pub fn parse_host_port(authority: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = authority.strip_prefix('[') {
        // [::1]:8080 or [::1]
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
        return (authority.to_string(), default_port);
    }

    match authority.rsplit_once(':') {
        // A second colon means an unbracketed IPv6 literal with no port
        Some((host, _)) if host.contains(':') => (authority.to_string(), default_port),
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(default_port)),
        None => (authority.to_string(), default_port),
    }
}
