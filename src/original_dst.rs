//! Original-destination recovery for transparently redirected connections.
//!
//! When traffic reaches the proxy through a kernel NAT redirect, the client
//! never says where it was going. On Linux the address recorded by connection
//! tracking is available through the `SO_ORIGINAL_DST` socket option; other
//! platforms get a provider that always reports the capability as missing, so
//! call sites look the same everywhere.

use crate::error::{ProxyError, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::TcpStream;

/// Recovers the address a redirected client originally dialed.
pub trait OriginalDstProvider: Send + Sync {
    /// Looks up the original destination of `stream`.
    ///
    /// Never cached: the answer is specific to this one connection.
    fn original_dst(&self, stream: &TcpStream) -> Result<SocketAddr>;
}

/// Returns the provider for the platform this binary was built for.
pub fn platform_provider() -> Arc<dyn OriginalDstProvider> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(KernelOriginalDst)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedOriginalDst::for_current_platform())
    }
}

/// Queries netfilter connection tracking via `getsockopt(SO_ORIGINAL_DST)`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOriginalDst;

#[cfg(target_os = "linux")]
impl OriginalDstProvider for KernelOriginalDst {
    fn original_dst(&self, stream: &TcpStream) -> Result<SocketAddr> {
        use std::os::unix::io::AsRawFd;

        // From <linux/netfilter_ipv4.h>.
        const SO_ORIGINAL_DST: libc::c_int = 80;

        let mut raw = [0u8; std::mem::size_of::<libc::sockaddr_in>()];
        let mut len = raw.len() as libc::socklen_t;

        // SAFETY: the fd is owned by `stream` for the duration of the call and
        // `raw`/`len` describe a writable buffer of the advertised size.
        let rc = unsafe {
            libc::getsockopt(
                stream.as_raw_fd(),
                libc::IPPROTO_IP,
                SO_ORIGINAL_DST,
                raw.as_mut_ptr() as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(ProxyError::OriginalDst(std::io::Error::last_os_error()));
        }

        decode_sockaddr_in(&raw[..len as usize])
            .map(SocketAddr::V4)
            .ok_or_else(|| {
                ProxyError::OriginalDst(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "short address record",
                ))
            })
    }
}

/// Always fails with [`ProxyError::Unsupported`].
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedOriginalDst {
    platform: &'static str,
}

impl UnsupportedOriginalDst {
    pub fn new(platform: &'static str) -> Self {
        Self { platform }
    }

    pub fn for_current_platform() -> Self {
        let platform = if cfg!(target_os = "macos") {
            "macOS"
        } else if cfg!(target_os = "windows") {
            "Windows"
        } else {
            std::env::consts::OS
        };
        Self::new(platform)
    }
}

impl OriginalDstProvider for UnsupportedOriginalDst {
    fn original_dst(&self, _stream: &TcpStream) -> Result<SocketAddr> {
        Err(ProxyError::Unsupported {
            platform: self.platform,
        })
    }
}

/// Decodes a raw IPv4 `sockaddr_in` record.
///
/// Layout: 2 bytes family, 2 bytes port (network order), 4 bytes address.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn decode_sockaddr_in(raw: &[u8]) -> Option<SocketAddrV4> {
    if raw.len() < 8 {
        return None;
    }
    let port = u16::from_be_bytes([raw[2], raw[3]]);
    let ip = Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7]);
    Some(SocketAddrV4::new(ip, port))
}
