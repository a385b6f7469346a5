//! TCP transport.
//!
//! TCP is reliable, so packets carry no footer unless the config asks for
//! one.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use super::{Medium, SocketConfig, StreamConnection, TransportConfig};
use crate::error::{Result, TransportError};

/// Packet connection over a TCP stream.
pub type TcpConnection = StreamConnection<TcpStream>;

/// TCP listener producing packet connections.
pub struct TcpTransport {
    listener: TcpListener,
    config: TransportConfig,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind to a local address (for listening).
    pub fn bind(addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        let socket_config = SocketConfig::from_transport_config(config);
        let std_socket = super::socket::create_tcp_socket(addr, &socket_config)?;

        // Set to non-blocking and convert to tokio
        std_socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;

        std_socket
            .listen(1024)
            .map_err(|e| TransportError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;

        let std_listener: std::net::TcpListener = std_socket.into();
        let listener =
            TcpListener::from_std(std_listener).map_err(|e| TransportError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::SocketError(e.to_string()))?;

        debug!(%local_addr, "tcp listener bound");

        Ok(Self {
            listener,
            config: config.clone(),
            local_addr,
        })
    }

    /// Connect to a remote address.
    pub async fn connect(remote_addr: SocketAddr, config: &TransportConfig) -> Result<TcpConnection> {
        let socket = if remote_addr.is_ipv6() {
            tokio::net::TcpSocket::new_v6()
        } else {
            tokio::net::TcpSocket::new_v4()
        }
        .map_err(|e| TransportError::Tcp(e.to_string()))?;

        socket
            .set_send_buffer_size(config.send_buffer_size as u32)
            .map_err(|e| TransportError::Tcp(e.to_string()))?;
        socket
            .set_recv_buffer_size(config.recv_buffer_size as u32)
            .map_err(|e| TransportError::Tcp(e.to_string()))?;

        // Connect with timeout
        let stream = timeout(config.connect_timeout, socket.connect(remote_addr))
            .await
            .map_err(|_| crate::Error::ConnectionTimeout)?
            .map_err(|e| crate::Error::ConnectionFailed {
                addr: remote_addr,
                reason: e.to_string(),
            })?;

        if config.tcp_nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| TransportError::Tcp(e.to_string()))?;
        }

        debug!(%remote_addr, "tcp connected");

        Ok(StreamConnection::new(stream, Medium::Tcp, config).with_peer(remote_addr))
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpConnection, SocketAddr)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::Tcp(e.to_string()))?;

        if self.config.tcp_nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| TransportError::Tcp(e.to_string()))?;
        }

        Ok((
            StreamConnection::new(stream, Medium::Tcp, &self.config).with_peer(addr),
            addr,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
