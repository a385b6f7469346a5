//! Low-level socket creation via socket2.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

use super::TransportConfig;
use crate::error::{Result, TransportError};

/// Socket configuration options.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    pub reuse_addr: bool,
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
}

impl SocketConfig {
    /// Create from transport config.
    pub fn from_transport_config(config: &TransportConfig) -> Self {
        Self {
            send_buffer_size: config.send_buffer_size,
            recv_buffer_size: config.recv_buffer_size,
            reuse_addr: config.reuse_addr,
            nodelay: config.tcp_nodelay,
            keepalive: config.keepalive_interval,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::from_transport_config(&TransportConfig::default())
    }
}

fn domain_for(addr: SocketAddr) -> Domain {
    if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    }
}

/// Create a bound, non-blocking UDP socket.
pub fn create_udp_socket(addr: SocketAddr, config: &SocketConfig) -> Result<Socket> {
    let socket = Socket::new(domain_for(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    configure_socket(&socket, config)?;

    // For IPv6, allow IPv4 mapped addresses
    if addr.is_ipv6() {
        socket
            .set_only_v6(false)
            .map_err(|e| TransportError::SocketError(e.to_string()))?;
    }

    socket
        .bind(&addr.into())
        .map_err(|e| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        })?;

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    Ok(socket)
}

/// Create a bound TCP socket, ready for `listen`.
pub fn create_tcp_socket(addr: SocketAddr, config: &SocketConfig) -> Result<Socket> {
    let socket = Socket::new(domain_for(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    configure_socket(&socket, config)?;

    if config.nodelay {
        socket
            .set_nodelay(true)
            .map_err(|e| TransportError::SocketError(e.to_string()))?;
    }

    if let Some(keepalive) = config.keepalive {
        let ka = TcpKeepalive::new()
            .with_time(keepalive)
            .with_interval(keepalive / 3);

        socket
            .set_tcp_keepalive(&ka)
            .map_err(|e| TransportError::SocketError(e.to_string()))?;
    }

    // For IPv6, allow IPv4 mapped addresses
    if addr.is_ipv6() {
        socket
            .set_only_v6(false)
            .map_err(|e| TransportError::SocketError(e.to_string()))?;
    }

    socket
        .bind(&addr.into())
        .map_err(|e| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        })?;

    Ok(socket)
}

/// Apply common socket configuration.
fn configure_socket(socket: &Socket, config: &SocketConfig) -> Result<()> {
    socket
        .set_send_buffer_size(config.send_buffer_size)
        .map_err(|e| TransportError::SocketError(format!("set send buffer: {e}")))?;

    socket
        .set_recv_buffer_size(config.recv_buffer_size)
        .map_err(|e| TransportError::SocketError(format!("set recv buffer: {e}")))?;

    if config.reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::SocketError(format!("set reuse addr: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_transport() {
        let transport = TransportConfig {
            keepalive_interval: None,
            recv_buffer_size: 4096,
            ..Default::default()
        };
        let config = SocketConfig::from_transport_config(&transport);
        assert_eq!(config.recv_buffer_size, 4096);
        assert!(config.keepalive.is_none());
    }

    #[test]
    fn test_create_udp_socket() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = create_udp_socket(addr, &SocketConfig::default()).unwrap();
        let local = socket.local_addr().unwrap();
        assert!(local.as_socket().is_some());
    }

    #[test]
    fn test_create_tcp_socket() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = create_tcp_socket(addr, &SocketConfig::default()).unwrap();
        let local = socket.local_addr().unwrap();
        assert!(local.as_socket().is_some());
    }
}
