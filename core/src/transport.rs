use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Packets larger than this may be truncated; KRPC messages comfortably fit.
pub const READ_BUF_LEN: usize = 1024;

/// Non-fatal deadline on `recv`: its expiry just means "nothing arrived",
/// not an error.
pub const READ_DEADLINE: Duration = Duration::from_secs(30);

/// Owns the one UDP socket a node uses for its whole lifetime. Bound to an
/// OS-chosen ephemeral port on `0.0.0.0`.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind() -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(TransportError::Bind)?;
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send(&self, bytes: &[u8], addr: SocketAddrV4) -> Result<(), TransportError> {
        self.socket
            .send_to(bytes, SocketAddr::V4(addr))
            .await
            .map(|_| ())
            .map_err(TransportError::Send)
    }

    /// Blocks for at most `READ_DEADLINE`; returns `None` on a timeout
    /// (never an error).
    pub async fn recv(&self, buf: &mut [u8; READ_BUF_LEN]) -> Option<(usize, SocketAddrV4)> {
        match tokio::time::timeout(READ_DEADLINE, self.socket.recv_from(buf)).await {
            Err(_elapsed) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "udp recv failed");
                None
            }
            Ok(Ok((len, SocketAddr::V4(addr)))) => Some((len, addr)),
            Ok(Ok((_, SocketAddr::V6(_)))) => {
                // Wire format is IPv4-only; a stray v6 packet on a v4-bound
                // socket should not happen, but is harmless to drop.
                None
            }
        }
    }
}

/// Resolves a bootstrap hostname (e.g. `router.bittorrent.com:6881`) to one
/// IPv4 address. A host that fails to resolve is skipped, never fatal, as
/// long as at least one other bootstrapper succeeds.
pub async fn resolve_bootstrap_host(host: &str) -> Result<SocketAddrV4, TransportError> {
    let mut addrs = lookup_host(host)
        .await
        .map_err(|_| TransportError::UnresolvedHost(host.to_string()))?;
    addrs
        .find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| TransportError::UnresolvedHost(host.to_string()))
}

/// Resolves every bootstrap host, logging and skipping any that fail.
pub async fn resolve_bootstrap_hosts(hosts: &[String]) -> Vec<SocketAddrV4> {
    let mut out = Vec::with_capacity(hosts.len());
    for host in hosts {
        match resolve_bootstrap_host(host).await {
            Ok(addr) => out.push(addr),
            Err(e) => debug!(host, error = %e, "bootstrap host did not resolve"),
        }
    }
    out
}
