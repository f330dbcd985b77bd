//! Connection dispatcher.
//!
//! Accepts TCP connections and gives each one its own task, which classifies
//! the stream and hands it to the HTTP forwarder or the tunnel relay. The
//! only state shared between tasks is read-only: the hosts table, the
//! original-destination provider and a few settings.

use crate::classify::{classify, StreamKind};
use crate::config::AppConfig;
use crate::error::{ProxyError, Result};
use crate::forward::forward_http;
use crate::hosts::HostsTable;
use crate::original_dst::{platform_provider, OriginalDstProvider};
use crate::resolver::HostResolver;
use crate::tunnel::{handle_tunnel, TunnelMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Read-only state handed to every connection task.
struct Shared {
    listen: String,
    resolver: HostResolver,
    original_dst: Arc<dyn OriginalDstProvider>,
    transparent: bool,
    connect_timeout: Option<Duration>,
}

/// The proxy server: a listener plus everything its handlers need.
#[derive(Clone)]
pub struct ProxyServer {
    shared: Arc<Shared>,
}

impl ProxyServer {
    /// Creates a server using this platform's original-destination provider.
    pub fn new(config: &AppConfig, hosts: HostsTable) -> Self {
        Self::with_original_dst(config, hosts, platform_provider())
    }

    /// Creates a server with an explicit original-destination provider.
    pub fn with_original_dst(
        config: &AppConfig,
        hosts: HostsTable,
        original_dst: Arc<dyn OriginalDstProvider>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                listen: config.server.listen.clone(),
                resolver: HostResolver::new(Arc::new(hosts)),
                original_dst,
                transparent: config.server.transparent,
                connect_timeout: config.server.connect_timeout(),
            }),
        }
    }

    /// Binds the configured listen address and serves until the process ends.
    ///
    /// Only a failure to bind is returned; everything after that is handled
    /// per connection.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.shared.listen.as_str())
            .await
            .map_err(|e| {
                error!(listen = %self.shared.listen, error = %e, "Failed to start proxy server");
                ProxyError::Io(e)
            })?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            listen = %local,
            transparent = self.shared.transparent,
            hosts = self.shared.resolver.hosts().len(),
            "Proxy server started"
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept client connection");
                    continue;
                }
            };

            let shared = self.shared.clone();
            let span = info_span!("conn", peer = %peer);
            tokio::spawn(
                async move {
                    if let Err(e) = handle_connection(&shared, stream).await {
                        log_connection_error(&e);
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Whether CONNECT destinations come from the kernel.
    pub fn is_transparent(&self) -> bool {
        self.shared.transparent
    }
}

async fn handle_connection(shared: &Shared, stream: TcpStream) -> Result<()> {
    let (kind, stream) = classify(stream).await?;
    debug!(kind = %kind, "Classified connection");

    match kind {
        StreamKind::Http => {
            forward_http(stream, &shared.resolver, shared.connect_timeout).await?;
        }
        StreamKind::Tunnel => {
            let mode = if shared.transparent {
                TunnelMode::Transparent(shared.original_dst.as_ref())
            } else {
                TunnelMode::Explicit
            };
            handle_tunnel(stream, &shared.resolver, mode, shared.connect_timeout).await?;
        }
    }
    Ok(())
}

fn log_connection_error(e: &ProxyError) {
    match e {
        ProxyError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!(error = %e, "Client closed before sending a request")
        }
        ProxyError::Io(_) => warn!(error = %e, "Failed to read client request"),
        ProxyError::Unsupported { .. } | ProxyError::OriginalDst(_) => {
            error!(error = %e, "Failed to get original destination")
        }
        ProxyError::Dial { .. } => warn!(error = %e, "Failed to connect to server"),
        _ => warn!(error = %e, "Connection failed"),
    }
}
