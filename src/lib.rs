//! # Hosts Relay Library
//!
//! This crate provides a TCP-level forwarding proxy that redirects client
//! connections according to a hosts-style override table, optionally
//! recovering the client's intended destination from the kernel when traffic
//! is redirected to it transparently.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types and handling
//! - [`logging`]: Logging setup and configuration
//! - [`hosts`]: Hosts override table loading
//! - [`resolver`]: Destination resolution against the override table
//! - [`peek`]: Peek-then-replay stream wrapper
//! - [`classify`]: First-byte classification of accepted connections
//! - [`original_dst`]: Platform-scoped original-destination recovery
//! - [`request`]: HTTP/1.x request head parsing
//! - [`forward`]: Single-shot HTTP forwarding
//! - [`tunnel`]: CONNECT tunnel relay
//! - [`proxy`]: The accept loop and per-connection dispatch
//!
//! ## Example
//!
//! ```ignore
//! use hosts_relay::config::AppConfig;
//! use hosts_relay::hosts::HostsTable;
//! use hosts_relay::proxy::ProxyServer;
//!
//! let config = AppConfig::default();
//! let hosts = HostsTable::load(&config.server.hosts_file)?;
//! ProxyServer::new(&config, hosts).run().await?;
//! ```
//!
//! ## Resolution
//!
//! A hostname found in the override table is dialed at its mapped IP; any
//! other hostname is dialed as-is. Ports are never changed, and plain HTTP
//! requests keep the client's original `Host` header.

pub mod classify;
pub mod config;
pub mod error;
pub mod forward;
pub mod hosts;
pub mod logging;
pub mod original_dst;
pub mod peek;
pub mod proxy;
pub mod request;
pub mod resolver;
pub mod tunnel;

pub use config::AppConfig;
pub use error::{ProxyError, Result};
pub use hosts::HostsTable;
pub use proxy::ProxyServer;
pub use resolver::{HostResolver, ResolvedTarget};
