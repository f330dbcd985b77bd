//! # Hosts Relay
//!
//! A TCP forwarding proxy that routes HTTP and CONNECT traffic through a
//! hosts-style override table.
//!
//! ## Usage
//!
//! ```bash
//! # Explicit proxy using /etc/hosts on the default port
//! hosts-relay
//!
//! # Custom hosts file and listen address
//! hosts-relay --hosts ./hosts --listen 127.0.0.1:8080
//!
//! # Behind an iptables REDIRECT rule (Linux only)
//! hosts-relay --transparent
//!
//! # Increase verbosity
//! hosts-relay -vvv
//! ```

use clap::Parser;
use hosts_relay::config::AppConfig;
use hosts_relay::hosts::HostsTable;
use hosts_relay::logging;
use hosts_relay::proxy::ProxyServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// A TCP forwarding proxy with hosts-file based destination overrides.
#[derive(Parser, Debug)]
#[command(name = "hosts-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to the hosts override file (overrides config)
    #[arg(long, env = "HOSTS_FILE")]
    hosts: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Recover CONNECT destinations from kernel NAT state
    #[arg(long)]
    transparent: bool,

    /// Increase verbosity (-v info, -vv debug, -vvv trace, -vvvv trace+deps)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Converts verbosity count to log level string
    fn log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }
        match self.verbose {
            0 => None, // Use config default
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// Whether to include verbose dependency logging
    fn trace_deps(&self) -> bool {
        self.verbose >= 4
    }

    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(ref listen) = self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(ref hosts) = self.hosts {
            config.server.hosts_file = hosts.clone();
        }
        if self.transparent {
            config.server.transparent = true;
        }
    }
}

/// Application entry point.
#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = load_config(&args);
    args.apply(&mut config);

    let _log_guard = match logging::init_logging(&config.logging, args.log_level(), args.trace_deps()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        hosts_file = %config.server.hosts_file.display(),
        "Starting hosts-relay"
    );

    if config.server.transparent && !cfg!(target_os = "linux") {
        warn!("Transparent proxy is not supported on this platform; CONNECT requests will fail");
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    let hosts = match HostsTable::load(&config.server.hosts_file) {
        Ok(hosts) => hosts,
        Err(e) => {
            error!(error = %e, "Failed to load hosts file");
            std::process::exit(1);
        }
    };
    info!(entries = hosts.len(), "Loaded hosts");

    let proxy_server = ProxyServer::new(&config, hosts);
    if let Err(e) = proxy_server.run().await {
        error!(error = %e, "Proxy server error");
        std::process::exit(1);
    }
}

/// Load configuration from file or use defaults
fn load_config(args: &Args) -> AppConfig {
    let config_path = args.config.clone().or_else(|| {
        let defaults = [
            "./config.yaml",
            "./config.yml",
            "/etc/hosts-relay/config.yaml",
        ];
        defaults
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    });

    match config_path {
        Some(path) => match AppConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: Failed to load config from {:?}: {}", path, e);
                eprintln!("Using default configuration");
                AppConfig::default()
            }
        },
        None => AppConfig::default(),
    }
}
