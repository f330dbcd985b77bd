//! Integration tests for hosts-relay.
//!
//! These tests run the full accept loop on a loopback listener and drive it
//! with real TCP clients against fake origin servers.

use hosts_relay::config::{AppConfig, LogFormat, ServerConfig};
use hosts_relay::hosts::HostsTable;
use hosts_relay::original_dst::{OriginalDstProvider, UnsupportedOriginalDst};
use hosts_relay::peek::PeekableStream;
use hosts_relay::proxy::ProxyServer;
use hosts_relay::request::read_request_head;
use hosts_relay::resolver::HostResolver;
use hosts_relay::tunnel::CONNECTION_ESTABLISHED;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Helper to create a temporary file with the given contents.
fn create_temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn example_hosts() -> HostsTable {
    HostsTable::parse("# test overrides\n127.0.0.1 example.com www.example.com\n")
}

/// Starts a proxy on an ephemeral loopback port and returns its address.
async fn start_proxy(
    transparent: bool,
    hosts: HostsTable,
    original_dst: Option<Arc<dyn OriginalDstProvider>>,
) -> SocketAddr {
    let config = AppConfig {
        server: ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            transparent,
            ..Default::default()
        },
        ..Default::default()
    };

    let server = match original_dst {
        Some(provider) => ProxyServer::with_original_dst(&config, hosts, provider),
        None => ProxyServer::new(&config, hosts),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

mod config_tests {
    use super::*;

    #[test]
    fn test_full_config_load() {
        let yaml = r#"
server:
  listen: "127.0.0.1:8080"
  hosts_file: "/srv/hosts"
  transparent: true
  connect_timeout: 15

logging:
  level: "debug"
  output: "stderr"
  format: "json"
  timestamps: false
  include_target: false
"#;
        let file = create_temp_file(yaml);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.hosts_file, PathBuf::from("/srv/hosts"));
        assert!(config.server.transparent);
        assert_eq!(config.server.connect_timeout(), Some(Duration::from_secs(15)));

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.output, "stderr");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.timestamps);
        assert!(!config.logging.include_target);
    }

    #[test]
    fn test_minimal_config() {
        let yaml = "# Empty config uses defaults\n{}";
        let file = create_temp_file(yaml);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:8888");
        assert_eq!(config.server.hosts_file, PathBuf::from("/etc/hosts"));
        assert!(!config.server.transparent);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.example.yaml");
        let config = AppConfig::load(path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_config_validation_errors() {
        let file = create_temp_file("server:\n  listen: \"nowhere\"\n");
        assert!(AppConfig::load(file.path()).is_err());

        let file = create_temp_file("logging:\n  level: \"super-verbose\"\n");
        assert!(AppConfig::load(file.path()).is_err());
    }
}

mod resolver_tests {
    use super::*;

    #[test]
    fn test_hosts_file_drives_resolution() {
        let file = create_temp_file(
            "127.0.0.1 localhost\n\
             # 9.9.9.9 commented.test\n\
             1.2.3.4 example.com\n\
             bogus-line\n\
             5.6.7.8 example.com\n",
        );
        let hosts = HostsTable::load(file.path()).unwrap();
        let resolver = HostResolver::new(Arc::new(hosts));

        let target = resolver.resolve("example.com", 443);
        assert_eq!(target.to_string(), "5.6.7.8:443");

        assert_eq!(resolver.resolve("commented.test", 80).host, "commented.test");
        assert_eq!(resolver.resolve("bogus-line", 80).host, "bogus-line");
    }

    #[test]
    fn test_every_entry_resolves_to_its_ip() {
        let hosts = HostsTable::parse(
            "10.0.0.1 a.test b.test\n10.0.0.2 c.test\n10.0.0.3 d.test e.test f.test\n",
        );
        let expected = [
            ("a.test", "10.0.0.1"),
            ("b.test", "10.0.0.1"),
            ("c.test", "10.0.0.2"),
            ("d.test", "10.0.0.3"),
            ("e.test", "10.0.0.3"),
            ("f.test", "10.0.0.3"),
        ];
        let resolver = HostResolver::new(Arc::new(hosts));
        for (host, ip) in expected {
            assert_eq!(resolver.resolve(host, 80).host, ip);
        }
        for host in ["g.test", "A.TEST", ""] {
            assert_eq!(resolver.resolve(host, 80).host, host);
        }
    }
}

mod proxy_tests {
    use super::*;

    #[tokio::test]
    async fn test_http_request_goes_to_override_with_original_host() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let proxy = start_proxy(false, example_hosts(), None).await;

        let origin_task = tokio::spawn(async move {
            let (mut sock, _) = origin.accept().await.unwrap();
            let head = read_request_head(&mut PeekableStream::new(&mut sock))
                .await
                .unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            head
        });

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client
            .write_all(
                format!("GET http://example.com:{port}/index.html HTTP/1.1\r\nHost: example.com:{port}\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();

        let mut resp = Vec::new();
        client.read_to_end(&mut resp).await.unwrap();
        assert_eq!(resp, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

        let head = origin_task.await.unwrap();
        assert_eq!(head.target, "/index.html");
        assert_eq!(head.header("host"), Some(format!("example.com:{port}").as_str()));
    }

    #[tokio::test]
    async fn test_connect_tunnel_end_to_end() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let proxy = start_proxy(false, example_hosts(), None).await;

        // Echo server standing in for the TLS origin.
        tokio::spawn(async move {
            let (mut sock, _) = origin.accept().await.unwrap();
            let (mut r, mut w) = sock.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client
            .write_all(format!("CONNECT www.example.com:{port} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut banner = vec![0u8; CONNECTION_ESTABLISHED.len()];
        client.read_exact(&mut banner).await.unwrap();
        assert_eq!(banner, CONNECTION_ESTABLISHED);

        let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        let (mut r, mut w) = client.into_split();
        let writer = {
            let payload = payload.clone();
            tokio::spawn(async move {
                w.write_all(&payload).await.unwrap();
                w.shutdown().await.unwrap();
            })
        };

        let mut echoed = Vec::new();
        r.read_to_end(&mut echoed).await.unwrap();
        writer.await.unwrap();
        assert_eq!(echoed, payload);
    }

    #[tokio::test]
    async fn test_tunnel_dial_failure_is_reported() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);
        let proxy = start_proxy(false, example_hosts(), None).await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client
            .write_all(format!("CONNECT example.com:{port} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut resp = Vec::new();
        client.read_to_end(&mut resp).await.unwrap();
        assert!(resp.starts_with(b"HTTP/1.1 503 "));
        assert!(!resp.windows(CONNECTION_ESTABLISHED.len()).any(|w| w == CONNECTION_ESTABLISHED));
    }

    #[tokio::test]
    async fn test_transparent_mode_on_unsupported_platform() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let proxy = start_proxy(
            true,
            example_hosts(),
            Some(Arc::new(UnsupportedOriginalDst::new("macOS"))),
        )
        .await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        client
            .write_all(format!("CONNECT example.com:{port} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        // Unread request bytes may turn the close into a reset.
        let mut resp = Vec::new();
        let _ = client.read_to_end(&mut resp).await;
        assert!(resp.is_empty());

        let dialed = tokio::time::timeout(Duration::from_millis(100), origin.accept()).await;
        assert!(dialed.is_err(), "no dial may happen without a destination");
    }

    #[tokio::test]
    async fn test_connections_are_isolated() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let proxy = start_proxy(false, example_hosts(), None).await;

        tokio::spawn(async move {
            loop {
                let (mut sock, _) = origin.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut r, mut w) = sock.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });

        // A client that hangs up immediately and one that sends garbage must
        // not disturb the tunnels running next to them.
        drop(TcpStream::connect(proxy).await.unwrap());
        let mut garbage = TcpStream::connect(proxy).await.unwrap();
        garbage.write_all(b"\x00\x01\x02\r\n\r\n").await.unwrap();

        let mut sessions = Vec::new();
        for i in 0..8u8 {
            sessions.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(proxy).await.unwrap();
                client
                    .write_all(format!("CONNECT example.com:{port} HTTP/1.1\r\n\r\n").as_bytes())
                    .await
                    .unwrap();
                let mut banner = vec![0u8; CONNECTION_ESTABLISHED.len()];
                client.read_exact(&mut banner).await.unwrap();

                let msg = [i; 32];
                client.write_all(&msg).await.unwrap();
                let mut back = [0u8; 32];
                client.read_exact(&mut back).await.unwrap();
                assert_eq!(back, msg);
            }));
        }

        for session in sessions {
            session.await.unwrap();
        }

        let mut resp = Vec::new();
        garbage.read_to_end(&mut resp).await.unwrap();
        assert!(resp.starts_with(b"HTTP/1.1 400 "));
    }
}
