//! UDP transport.
//!
//! One datagram carries exactly one packet, CRC-8 protected by default.
//! A bound (server) socket talks to many sensors: [`UdpConnection::recv_from`]
//! exposes the sender, and plain `send` replies to the last sender seen.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{exceeds_limit, Connection, Medium, SocketConfig, TransportConfig};
use crate::error::{Error, Result, TransportError};
use crate::protocol::{
    decode_packet, marshal, Header, Message, MessageType, Packet, TransportCrc,
    MAX_PACKET_SIZE,
};
use crate::types::{ConnectionState, PacketIdSequence, TrafficStats};

/// Packet connection over a UDP socket.
pub struct UdpConnection {
    socket: UdpSocket,
    connected: bool,
    peer: RwLock<Option<SocketAddr>>,
    ids: PacketIdSequence,
    crc: TransportCrc,
    max_message_size: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    state: RwLock<ConnectionState>,
    stats: Mutex<TrafficStats>,
}

impl UdpConnection {
    /// Bind to a local address (server mode).
    pub fn bind(addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        let socket_config = SocketConfig::from_transport_config(config);
        let std_socket = super::socket::create_udp_socket(addr, &socket_config)?;

        let socket =
            UdpSocket::from_std(std_socket.into()).map_err(|e| TransportError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;

        debug!(local_addr = ?socket.local_addr().ok(), "udp socket bound");

        Ok(Self::from_socket(socket, false, None, config))
    }

    /// Create a connected UDP socket (client mode).
    pub async fn connect(remote_addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        let bind = if remote_addr.is_ipv6() {
            SocketAddr::from(([0u8; 16], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };

        let socket_config = SocketConfig::from_transport_config(config);
        let std_socket = super::socket::create_udp_socket(bind, &socket_config)?;

        let socket =
            UdpSocket::from_std(std_socket.into()).map_err(|e| TransportError::BindFailed {
                addr: bind,
                reason: e.to_string(),
            })?;

        socket
            .connect(remote_addr)
            .await
            .map_err(|e| Error::ConnectionFailed {
                addr: remote_addr,
                reason: e.to_string(),
            })?;

        Ok(Self::from_socket(socket, true, Some(remote_addr), config))
    }

    fn from_socket(
        socket: UdpSocket,
        connected: bool,
        peer: Option<SocketAddr>,
        config: &TransportConfig,
    ) -> Self {
        Self {
            socket,
            connected,
            peer: RwLock::new(peer),
            ids: PacketIdSequence::new(),
            crc: config.effective_crc(Medium::Udp),
            max_message_size: config.effective_max_message_size(Medium::Udp),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            state: RwLock::new(ConnectionState::Connected),
            stats: Mutex::new(TrafficStats::default()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::SocketError(e.to_string()).into())
    }

    /// Encode and send a message to a specific address.
    pub async fn send_to(&self, message: &Message, addr: SocketAddr) -> Result<u8> {
        self.send_packet(message, message.message_type(), Some(addr))
            .await
    }

    /// Receive the next packet together with its sender.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr)> {
        if !self.state().is_connected() {
            return Err(Error::ConnectionClosed);
        }

        let mut buf = vec![0u8; self.max_message_size.max(MAX_PACKET_SIZE) + 1];
        let recv = self.socket.recv_from(&mut buf);
        let (len, from) = match self.read_timeout {
            Some(limit) => timeout(limit, recv)
                .await
                .map_err(|_| Error::from(TransportError::ReadTimeout))?,
            None => recv.await,
        }
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

        if !self.connected {
            *self.peer.write() = Some(from);
        }

        let datagram = &buf[..len];
        let oversized = match Header::decode(datagram) {
            Ok(header) => exceeds_limit(&header, len, self.max_message_size),
            Err(_) => len > self.max_message_size,
        };
        if oversized {
            self.stats.lock().record_dropped(len);
            return Err(TransportError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            }
            .into());
        }

        match decode_packet(datagram, self.crc) {
            Ok(packet) => {
                let expected = packet.header.frame_len(self.crc);
                if len > expected {
                    debug!(%from, extra = len - expected, "ignoring bytes after packet");
                }
                self.stats.lock().record_received(len);
                trace!(%from, packet_id = packet.packet_id(), msg_type = %packet.message_type(), "received packet");
                Ok((packet, from))
            }
            Err(e) => {
                self.stats.lock().record_dropped(len);
                debug!(%from, error = %e, size = len, "dropped datagram");
                Err(e)
            }
        }
    }

    async fn send_packet(
        &self,
        message: &Message,
        declared: MessageType,
        to: Option<SocketAddr>,
    ) -> Result<u8> {
        if !self.state().is_connected() {
            return Err(Error::ConnectionClosed);
        }

        let packet_id = self.ids.next();
        let bytes = marshal(message, packet_id, declared, self.crc)?;

        if bytes.len() > self.max_message_size && !message.is_fragment() {
            return Err(TransportError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            }
            .into());
        }

        let send = async {
            match to {
                Some(addr) => self.socket.send_to(&bytes, addr).await,
                None if self.connected => self.socket.send(&bytes).await,
                None => {
                    // Copy the address before await to avoid holding lock across await point
                    let peer = { *self.peer.read() };
                    match peer {
                        Some(addr) => self.socket.send_to(&bytes, addr).await,
                        None => Err(std::io::Error::new(
                            std::io::ErrorKind::NotConnected,
                            "no peer address known yet",
                        )),
                    }
                }
            }
        };

        let sent = match self.write_timeout {
            Some(limit) => timeout(limit, send)
                .await
                .map_err(|_| Error::from(TransportError::WriteTimeout))?,
            None => send.await,
        }
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if sent != bytes.len() {
            return Err(TransportError::SendFailed(format!(
                "partial write: wrote {sent} of {} bytes",
                bytes.len()
            ))
            .into());
        }

        self.stats.lock().record_sent(sent);
        trace!(packet_id, msg_type = %declared, size = sent, "sent datagram");

        Ok(packet_id)
    }
}

#[async_trait]
impl Connection for UdpConnection {
    async fn send_as(&self, message: &Message, declared: MessageType) -> Result<u8> {
        self.send_packet(message, declared, None).await
    }

    async fn recv(&self) -> Result<Packet> {
        self.recv_from().await.map(|(packet, _)| packet)
    }

    async fn close(&self) -> Result<()> {
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn crc(&self) -> TransportCrc {
        self.crc
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }

    fn stats(&self) -> TrafficStats {
        *self.stats.lock()
    }

    fn transport_type(&self) -> &'static str {
        "udp"
    }
}
